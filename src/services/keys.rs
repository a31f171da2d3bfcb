//! Storage key construction.

use uuid::Uuid;

pub const DEFAULT_KEY_PREFIX: &str = "uploads/";

/// How a sanitized filename becomes an object key. Chosen once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyPolicy {
    /// `{name}`; a repeat upload overwrites the previous object.
    Raw,
    /// `{prefix}{uuid}_{name}`.
    Unique { prefix: String },
    /// `{uuid}_{name}` with no logical prefix.
    Flat,
}

impl Default for KeyPolicy {
    fn default() -> Self {
        KeyPolicy::Unique {
            prefix: DEFAULT_KEY_PREFIX.to_string(),
        }
    }
}

impl KeyPolicy {
    /// Build a `Unique` policy, normalizing the prefix to `a/b/` form.
    ///
    /// Returns `None` if the prefix contains a `..` segment or a backslash.
    pub fn unique_with_prefix(prefix: &str) -> Option<Self> {
        let segments: Vec<&str> = prefix.split('/').filter(|s| !s.is_empty()).collect();
        if prefix.contains('\\') || segments.iter().any(|s| *s == "." || *s == "..") {
            return None;
        }
        let mut normalized = segments.join("/");
        if !normalized.is_empty() {
            normalized.push('/');
        }
        Some(KeyPolicy::Unique { prefix: normalized })
    }

    /// `sanitized_name` must already be a bare base name.
    pub fn build_key(&self, sanitized_name: &str) -> String {
        match self {
            KeyPolicy::Raw => sanitized_name.to_string(),
            KeyPolicy::Unique { prefix } => {
                format!("{}{}_{}", prefix, Uuid::new_v4(), sanitized_name)
            }
            KeyPolicy::Flat => format!("{}_{}", Uuid::new_v4(), sanitized_name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_policy_is_stable() {
        let policy = KeyPolicy::Raw;
        assert_eq!(policy.build_key("photo.png"), "photo.png");
        assert_eq!(policy.build_key("photo.png"), policy.build_key("photo.png"));
    }

    #[test]
    fn unique_policy_prefixes_and_disambiguates() {
        let policy = KeyPolicy::default();
        let a = policy.build_key("photo.png");
        let b = policy.build_key("photo.png");
        assert_ne!(a, b);
        assert!(a.starts_with("uploads/"));
        assert!(a.ends_with("_photo.png"));

        let token = a
            .trim_start_matches("uploads/")
            .trim_end_matches("_photo.png");
        assert!(Uuid::parse_str(token).is_ok());
    }

    #[test]
    fn flat_policy_has_no_prefix() {
        let key = KeyPolicy::Flat.build_key("photo.png");
        assert!(!key.contains('/'));
        assert!(key.ends_with("_photo.png"));
    }

    #[test]
    fn prefixes_are_normalized() {
        assert_eq!(
            KeyPolicy::unique_with_prefix("/media//images"),
            Some(KeyPolicy::Unique {
                prefix: "media/images/".into()
            })
        );
        assert_eq!(
            KeyPolicy::unique_with_prefix(""),
            Some(KeyPolicy::Unique { prefix: "".into() })
        );
        assert_eq!(KeyPolicy::unique_with_prefix("uploads/../secret"), None);
        assert_eq!(KeyPolicy::unique_with_prefix(r"uploads\x"), None);
    }
}
