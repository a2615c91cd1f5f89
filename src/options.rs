//! Filter resolution - turns raw user flags into concrete listing query options
//!
//! The visibility and affiliation flags are tri-state: a flag the user never
//! touched behaves differently from one explicitly set to false, so the raw
//! state is modeled as an explicit enum rather than a plain bool.

use anyhow::{anyhow, Result};

/// Tri-state flag as supplied on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Flag {
    True,
    False,
    #[default]
    Unset,
}

impl Flag {
    /// Build from a `--thing` / `--no-thing` flag pair
    pub fn from_pair(yes: bool, no: bool) -> Self {
        match (yes, no) {
            (true, _) => Flag::True,
            (false, true) => Flag::False,
            (false, false) => Flag::Unset,
        }
    }

    pub fn is_true(self) -> bool {
        self == Flag::True
    }

    pub fn is_false(self) -> bool {
        self == Flag::False
    }
}

/// Raw per-run filter state, frozen before the pipeline starts
#[derive(Debug, Clone, Default)]
pub struct FilterFlags {
    pub public: Flag,
    pub private: Flag,
    pub owner: Flag,
    pub collaborator: Flag,
    pub member: Flag,
}

/// Classification of the account being backed up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountType {
    /// The token owner's own account
    Authenticated,
    /// Another individual user account
    User,
    /// An organization account
    Organization,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Public,
    Private,
    All,
}

impl Visibility {
    pub fn as_str(self) -> &'static str {
        match self {
            Visibility::Public => "public",
            Visibility::Private => "private",
            Visibility::All => "all",
        }
    }
}

/// A user's relationship to a repository
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Affiliation {
    Owner,
    Collaborator,
    Member,
}

impl Affiliation {
    /// Token used in the `affiliation` query parameter. The API spells
    /// organization membership out as `organization_member`.
    pub fn api_token(self) -> &'static str {
        match self {
            Affiliation::Owner => "owner",
            Affiliation::Collaborator => "collaborator",
            Affiliation::Member => "organization_member",
        }
    }
}

/// Resolved search parameters for one listing run
///
/// Built once by [`resolve`] and read-only afterwards. Knows how to render
/// itself as query parameters for the listing endpoint that matches its
/// account type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryOptions {
    pub account_type: AccountType,
    pub visibility: Visibility,
    /// Ordered affiliation set; empty means "no affiliation restriction"
    pub affiliations: Vec<Affiliation>,
}

impl QueryOptions {
    /// Query parameters for the listing request
    ///
    /// The authenticated listing takes `visibility` plus an `affiliation`
    /// list; user and organization listings collapse everything into a
    /// single `type` selector.
    pub fn query_params(&self) -> Vec<(&'static str, String)> {
        match self.account_type {
            AccountType::Authenticated => {
                let mut params = vec![("visibility", self.visibility.as_str().to_string())];
                if !self.affiliations.is_empty() {
                    let joined = self
                        .affiliations
                        .iter()
                        .map(|a| a.api_token())
                        .collect::<Vec<_>>()
                        .join(",");
                    params.push(("affiliation", joined));
                }
                params
            }
            AccountType::User => {
                let selector = match self.affiliations.as_slice() {
                    [Affiliation::Member] => "member",
                    [Affiliation::Owner] => "owner",
                    _ => "all",
                };
                vec![("type", selector.to_string())]
            }
            AccountType::Organization => {
                let selector = match self.affiliations.as_slice() {
                    [Affiliation::Member] => "member",
                    _ => self.visibility.as_str(),
                };
                vec![("type", selector.to_string())]
            }
        }
    }
}

/// Resolve raw filter flags and an account type into query options
///
/// Pure function of its inputs; all default/inference rules live here so
/// they can be unit tested without touching the network.
pub fn resolve(flags: &FilterFlags, account_type: AccountType) -> Result<QueryOptions> {
    match account_type {
        AccountType::Authenticated => Ok(resolve_authenticated(flags)),
        AccountType::User => Ok(resolve_user(flags)),
        AccountType::Organization => Ok(resolve_organization(flags)),
    }
}

fn resolve_visibility(flags: &FilterFlags) -> Visibility {
    if flags.public.is_true() && !flags.private.is_true() {
        Visibility::Public
    } else if flags.private.is_true() && !flags.public.is_true() {
        Visibility::Private
    } else {
        Visibility::All
    }
}

fn resolve_authenticated(flags: &FilterFlags) -> QueryOptions {
    let candidates = [
        (Affiliation::Owner, flags.owner),
        (Affiliation::Collaborator, flags.collaborator),
        (Affiliation::Member, flags.member),
    ];

    let any_explicit_true = candidates.iter().any(|(_, f)| f.is_true());

    // If the user named any affiliation explicitly, that set is exact.
    // Otherwise every flag not explicitly false is included.
    let affiliations = candidates
        .iter()
        .filter(|(_, f)| {
            if any_explicit_true {
                f.is_true()
            } else {
                !f.is_false()
            }
        })
        .map(|(a, _)| *a)
        .collect();

    QueryOptions {
        account_type: AccountType::Authenticated,
        visibility: resolve_visibility(flags),
        affiliations,
    }
}

fn resolve_user(flags: &FilterFlags) -> QueryOptions {
    // Collaborator is not a meaningful discriminator for other users'
    // listings; only owner/member narrow the result.
    let affiliations = if flags.member.is_true() && !flags.owner.is_true() {
        vec![Affiliation::Member]
    } else if flags.owner.is_true() && !flags.member.is_true() {
        vec![Affiliation::Owner]
    } else {
        Vec::new()
    };

    QueryOptions {
        account_type: AccountType::User,
        visibility: Visibility::All,
        affiliations,
    }
}

fn resolve_organization(flags: &FilterFlags) -> QueryOptions {
    let (visibility, affiliations) =
        if flags.public.is_true() && !flags.private.is_true() && !flags.member.is_true() {
            (Visibility::Public, Vec::new())
        } else if flags.private.is_true() && !flags.public.is_true() && !flags.member.is_true() {
            (Visibility::Private, Vec::new())
        } else if flags.member.is_true() && !flags.public.is_true() && !flags.private.is_true() {
            (Visibility::All, vec![Affiliation::Member])
        } else {
            (Visibility::All, Vec::new())
        };

    QueryOptions {
        account_type: AccountType::Organization,
        visibility,
        affiliations,
    }
}

/// Classify a remote account `type` field
pub fn account_type_from_api(type_field: &str) -> Result<AccountType> {
    match type_field {
        "User" => Ok(AccountType::User),
        "Organization" => Ok(AccountType::Organization),
        other => Err(anyhow!("Unhandled account type: {}", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flags() -> FilterFlags {
        FilterFlags::default()
    }

    #[test]
    fn test_authenticated_defaults_to_everything() {
        let opts = resolve(&flags(), AccountType::Authenticated).unwrap();
        assert_eq!(opts.visibility, Visibility::All);
        assert_eq!(
            opts.affiliations,
            vec![
                Affiliation::Owner,
                Affiliation::Collaborator,
                Affiliation::Member
            ]
        );
    }

    #[test]
    fn test_authenticated_unset_flags_default_in_minus_explicit_false() {
        let mut f = flags();
        f.collaborator = Flag::False;
        let opts = resolve(&f, AccountType::Authenticated).unwrap();
        assert_eq!(
            opts.affiliations,
            vec![Affiliation::Owner, Affiliation::Member]
        );
    }

    #[test]
    fn test_authenticated_explicit_true_set_is_exact() {
        let mut f = flags();
        f.owner = Flag::True;
        // member stays unset; an explicit true elsewhere excludes it
        let opts = resolve(&f, AccountType::Authenticated).unwrap();
        assert_eq!(opts.affiliations, vec![Affiliation::Owner]);
    }

    #[test]
    fn test_authenticated_all_flags_false_yields_empty_set() {
        let mut f = flags();
        f.owner = Flag::False;
        f.collaborator = Flag::False;
        f.member = Flag::False;
        let opts = resolve(&f, AccountType::Authenticated).unwrap();
        assert!(opts.affiliations.is_empty());
    }

    #[test]
    fn test_authenticated_visibility_resolution() {
        let mut f = flags();
        f.public = Flag::True;
        let opts = resolve(&f, AccountType::Authenticated).unwrap();
        assert_eq!(opts.visibility, Visibility::Public);

        let mut f = flags();
        f.private = Flag::True;
        let opts = resolve(&f, AccountType::Authenticated).unwrap();
        assert_eq!(opts.visibility, Visibility::Private);

        let mut f = flags();
        f.public = Flag::True;
        f.private = Flag::True;
        let opts = resolve(&f, AccountType::Authenticated).unwrap();
        assert_eq!(opts.visibility, Visibility::All);
    }

    #[test]
    fn test_user_collapses_to_single_selector() {
        let mut f = flags();
        f.member = Flag::True;
        let opts = resolve(&f, AccountType::User).unwrap();
        assert_eq!(opts.affiliations, vec![Affiliation::Member]);
        assert_eq!(opts.query_params(), vec![("type", "member".to_string())]);

        let mut f = flags();
        f.owner = Flag::True;
        let opts = resolve(&f, AccountType::User).unwrap();
        assert_eq!(opts.query_params(), vec![("type", "owner".to_string())]);

        // Both set: neither wins, fall back to all
        let mut f = flags();
        f.owner = Flag::True;
        f.member = Flag::True;
        let opts = resolve(&f, AccountType::User).unwrap();
        assert_eq!(opts.query_params(), vec![("type", "all".to_string())]);
    }

    #[test]
    fn test_organization_type_selector() {
        let mut f = flags();
        f.public = Flag::True;
        let opts = resolve(&f, AccountType::Organization).unwrap();
        assert_eq!(opts.query_params(), vec![("type", "public".to_string())]);

        let mut f = flags();
        f.private = Flag::True;
        let opts = resolve(&f, AccountType::Organization).unwrap();
        assert_eq!(opts.query_params(), vec![("type", "private".to_string())]);

        let mut f = flags();
        f.member = Flag::True;
        let opts = resolve(&f, AccountType::Organization).unwrap();
        assert_eq!(opts.query_params(), vec![("type", "member".to_string())]);

        let mut f = flags();
        f.public = Flag::True;
        f.member = Flag::True;
        let opts = resolve(&f, AccountType::Organization).unwrap();
        assert_eq!(opts.query_params(), vec![("type", "all".to_string())]);
    }

    #[test]
    fn test_authenticated_query_params() {
        let opts = resolve(&flags(), AccountType::Authenticated).unwrap();
        let params = opts.query_params();
        assert_eq!(params[0], ("visibility", "all".to_string()));
        assert_eq!(
            params[1],
            (
                "affiliation",
                "owner,collaborator,organization_member".to_string()
            )
        );
    }

    #[test]
    fn test_flag_from_pair() {
        assert_eq!(Flag::from_pair(true, false), Flag::True);
        assert_eq!(Flag::from_pair(true, true), Flag::True);
        assert_eq!(Flag::from_pair(false, true), Flag::False);
        assert_eq!(Flag::from_pair(false, false), Flag::Unset);
    }

    #[test]
    fn test_account_type_from_api() {
        assert_eq!(account_type_from_api("User").unwrap(), AccountType::User);
        assert_eq!(
            account_type_from_api("Organization").unwrap(),
            AccountType::Organization
        );
        assert!(account_type_from_api("Bot").is_err());
    }
}
