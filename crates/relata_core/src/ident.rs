//! Uuid minting for entities, collections and transactions.

use uuid::Uuid;

/// Mints process-unique ids for named object types.
///
/// Every entity, collection and transaction gets a uuid distinct from
/// its primary-key derived id. The uuid is stable even while the
/// object is new and its primary key is unassigned.
pub trait IdGenerator {
    /// Generates a unique id for the given type name.
    fn generate_id(&self, type_name: &str) -> String;
}

/// Default generator backed by random v4 uuids.
///
/// Ids look like `User-67e55044-10b1-426f-9247-bb680e5fe0c8`, keeping
/// the type name visible in traces and serialized output.
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn generate_id(&self, type_name: &str) -> String {
        format!("{type_name}-{}", Uuid::new_v4())
    }
}

/// Mints a uuid with the default generator.
#[must_use]
pub fn mint(type_name: &str) -> String {
    UuidGenerator.generate_id(type_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique() {
        let a = mint("User");
        let b = mint("User");
        assert_ne!(a, b);
    }

    #[test]
    fn id_carries_type_name() {
        let id = mint("Card");
        assert!(id.starts_with("Card-"));
    }
}
