/// Common test utilities and helpers for repovault tests
use serde_json::{json, Value};

/// Builder for raw listing-API repository records
#[derive(Debug, Clone)]
pub struct MockRepository {
    pub name: String,
    pub owner: String,
    pub is_fork: bool,
    pub is_private: bool,
    pub pull_access: bool,
}

impl MockRepository {
    pub fn new(name: &str, owner: &str) -> Self {
        Self {
            name: name.to_string(),
            owner: owner.to_string(),
            is_fork: false,
            is_private: false,
            pull_access: true,
        }
    }

    pub fn as_private(mut self) -> Self {
        self.is_private = true;
        self
    }

    pub fn without_pull_access(mut self) -> Self {
        self.pull_access = false;
        self
    }

    pub fn to_json(&self) -> Value {
        let full_name = format!("{}/{}", self.owner, self.name);
        json!({
            "name": self.name,
            "full_name": full_name,
            "private": self.is_private,
            "fork": self.is_fork,
            "clone_url": format!("https://github.com/{}.git", full_name),
            "ssh_url": format!("git@github.com:{}.git", full_name),
            "permissions": { "pull": self.pull_access, "push": false, "admin": false },
        })
    }
}

/// A numbered page of repository records
pub fn repo_page(owner: &str, start: usize, count: usize) -> Value {
    let repos: Vec<Value> = (start..start + count)
        .map(|i| MockRepository::new(&format!("repo-{:03}", i), owner).to_json())
        .collect();
    Value::Array(repos)
}

/// Account lookup response body
pub fn account_json(login: &str, account_type: &str) -> Value {
    json!({
        "login": login,
        "type": account_type,
        "id": 1,
    })
}

/// `Link` header pointing at the next page on a mock server
pub fn next_link_header(base_url: &str, path: &str, page: usize) -> String {
    format!("<{}{}?page={}>; rel=\"next\"", base_url, path, page)
}
