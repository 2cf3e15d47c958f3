use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! string_id {
    ($name:ident) => {
        #[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            pub fn new(raw: impl Into<String>) -> Self {
                Self(raw.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(raw: &str) -> Self {
                Self(raw.to_string())
            }
        }

        impl From<String> for $name {
            fn from(raw: String) -> Self {
                Self(raw)
            }
        }
    };
}

string_id!(EntityId);
string_id!(LocalId);

impl LocalId {
    /// Synthesize a fresh placeholder id: `prefix` followed by a random v4 uuid.
    pub fn generate(prefix: &str) -> Self {
        Self(format!("{prefix}{}", Uuid::new_v4()))
    }
}

/// Identity of an entity inside a collection view.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EntityKey {
    Confirmed(EntityId),
    Pending(LocalId),
}

impl EntityKey {
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending(_))
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Confirmed(id) => id.as_str(),
            Self::Pending(local_id) => local_id.as_str(),
        }
    }
}

impl fmt::Debug for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Confirmed(id) => write!(f, "{id:?}"),
            Self::Pending(local_id) => write!(f, "{local_id:?}"),
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<EntityId> for EntityKey {
    fn from(id: EntityId) -> Self {
        Self::Confirmed(id)
    }
}

impl From<LocalId> for EntityKey {
    fn from(local_id: LocalId) -> Self {
        Self::Pending(local_id)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SubscriptionId({})", &self.0.to_string()[..8])
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_local_ids_carry_prefix_and_differ() {
        let a = LocalId::generate("TEMP-");
        let b = LocalId::generate("TEMP-");
        assert!(a.as_str().starts_with("TEMP-"));
        assert_eq!(a.as_str().len(), "TEMP-".len() + 36);
        assert_ne!(a, b);
    }

    #[test]
    fn pending_and_confirmed_keys_never_collide() {
        let confirmed = EntityKey::from(EntityId::from("A"));
        let pending = EntityKey::from(LocalId::from("A"));
        assert_ne!(confirmed, pending);
        assert!(pending.is_pending());
        assert!(!confirmed.is_pending());
        assert_eq!(confirmed.to_string(), "A");
    }
}
