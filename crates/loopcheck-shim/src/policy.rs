use loopcheck_store::{constant_time_eq, AllowList};

use crate::{extension_slug, ExtensionDescriptor, ThemeSelection};

#[derive(Debug, Clone, PartialEq, Eq)]
/// What the remainder of a request may load.
pub enum LoadingPolicy {
    /// Troubleshooting inactive; normal loading.
    Unrestricted,
    /// Session active but the request did not present the live token: no
    /// extensions, default presentation.
    Isolated,
    /// The request presented the live token.
    AllowListed {
        allow_list: AllowList,
        default_presentation: bool,
    },
}

impl LoadingPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadingPolicy::Unrestricted => "unrestricted",
            LoadingPolicy::Isolated => "isolated",
            LoadingPolicy::AllowListed { .. } => "allow_listed",
        }
    }

    pub fn is_troubleshooting(&self) -> bool {
        !matches!(self, LoadingPolicy::Unrestricted)
    }

    pub fn permits_extension(&self, slug: &str) -> bool {
        match self {
            LoadingPolicy::Unrestricted => true,
            LoadingPolicy::Isolated => false,
            LoadingPolicy::AllowListed { allow_list, .. } => allow_list.contains(slug),
        }
    }

    pub fn forces_default_presentation(&self) -> bool {
        match self {
            LoadingPolicy::Unrestricted => false,
            LoadingPolicy::Isolated => true,
            LoadingPolicy::AllowListed {
                default_presentation,
                ..
            } => *default_presentation,
        }
    }

    /// Keeps registry order; drops everything the policy suppresses. Registry
    /// entries given as `dir/file` are matched by their slug.
    pub fn filter_extensions(&self, extensions: &[ExtensionDescriptor]) -> Vec<ExtensionDescriptor> {
        extensions
            .iter()
            .filter(|extension| self.permits_extension(&extension_slug(&extension.slug)))
            .cloned()
            .collect()
    }

    pub fn effective_theme<'a>(&self, themes: &'a ThemeSelection) -> &'a str {
        if self.forces_default_presentation() {
            &themes.default
        } else {
            &themes.active
        }
    }
}

/// Maps the stored token, the presented token and the stored allow-list to a
/// loading policy. Performs no I/O.
pub fn resolve_loading_policy(
    stored_token: Option<&str>,
    requested_token: Option<&str>,
    allow_list: &AllowList,
    default_presentation: bool,
) -> LoadingPolicy {
    let Some(stored_token) = stored_token.filter(|token| !token.is_empty()) else {
        return LoadingPolicy::Unrestricted;
    };
    match requested_token {
        Some(requested) if constant_time_eq(stored_token.as_bytes(), requested.as_bytes()) => {
            LoadingPolicy::AllowListed {
                allow_list: allow_list.clone(),
                default_presentation,
            }
        }
        _ => LoadingPolicy::Isolated,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> Vec<ExtensionDescriptor> {
        vec![
            ExtensionDescriptor::new("akismet/akismet.php", "Akismet"),
            ExtensionDescriptor::new("broken-plugin/broken.php", "Broken Plugin"),
            ExtensionDescriptor::new("hello.php", "Hello Dolly"),
        ]
    }

    fn themes() -> ThemeSelection {
        ThemeSelection {
            active: "storefront".to_string(),
            default: "twentytwentyfour".to_string(),
        }
    }

    #[test]
    fn unit_absent_stored_token_is_unrestricted() {
        let policy = resolve_loading_policy(None, Some("abc"), &AllowList::single("akismet"), true);
        assert_eq!(policy, LoadingPolicy::Unrestricted);
        assert_eq!(policy.filter_extensions(&registry()).len(), 3);
        assert_eq!(policy.effective_theme(&themes()), "storefront");

        let blank = resolve_loading_policy(Some(""), None, &AllowList::empty(), false);
        assert_eq!(blank, LoadingPolicy::Unrestricted);
    }

    #[test]
    fn unit_matching_token_loads_only_allow_listed_extension() {
        let policy = resolve_loading_policy(
            Some("token-1"),
            Some("token-1"),
            &AllowList::single("broken-plugin"),
            false,
        );
        let loaded = policy.filter_extensions(&registry());
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].slug, "broken-plugin");
        assert_eq!(policy.effective_theme(&themes()), "storefront");
    }

    #[test]
    fn unit_matching_token_with_empty_allow_list_loads_nothing() {
        let policy =
            resolve_loading_policy(Some("token-1"), Some("token-1"), &AllowList::empty(), true);
        assert!(policy.filter_extensions(&registry()).is_empty());
        assert_eq!(policy.effective_theme(&themes()), "twentytwentyfour");
    }

    #[test]
    fn unit_mismatched_token_isolates_regardless_of_allow_list() {
        let allow_all = AllowList::parse_csv("akismet,broken-plugin,hello.php");
        for requested in [None, Some("token-0"), Some("token-10"), Some("")] {
            let policy = resolve_loading_policy(Some("token-1"), requested, &allow_all, false);
            assert_eq!(policy, LoadingPolicy::Isolated);
            assert!(policy.filter_extensions(&registry()).is_empty());
            assert_eq!(policy.effective_theme(&themes()), "twentytwentyfour");
        }
    }

    #[test]
    fn unit_presentation_flag_is_orthogonal_to_allow_list() {
        let allow_list = AllowList::single("akismet");
        let with_theme = resolve_loading_policy(Some("t"), Some("t"), &allow_list, false);
        let without_theme = resolve_loading_policy(Some("t"), Some("t"), &allow_list, true);
        assert_eq!(
            with_theme.filter_extensions(&registry()),
            without_theme.filter_extensions(&registry())
        );
        assert!(!with_theme.forces_default_presentation());
        assert!(without_theme.forces_default_presentation());
    }

    #[test]
    fn regression_registry_paths_are_matched_by_slug() {
        let listed = vec![ExtensionDescriptor {
            slug: "akismet/akismet.php".to_string(),
            name: "Akismet".to_string(),
        }];
        let policy = resolve_loading_policy(
            Some("live"),
            Some("live"),
            &AllowList::single("akismet"),
            false,
        );
        assert_eq!(policy.filter_extensions(&listed), listed);
    }
}
