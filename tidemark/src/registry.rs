//! Migration registry.
//!
//! Units are registered either explicitly through [`RegistryBuilder`] or at
//! compile time with the `#[migration]` attribute, which submits a
//! [`MigrationRegistration`] to the `inventory` collection. Either way the
//! registry is validated once, when it is built, and is immutable afterwards.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::error;

use crate::context::MigrationContext;
use crate::errors::{DiscoveryError, MigrationError};
use crate::watermark::MigrationWatermark;

/// Future returned by a migration body.
pub type MigrationFuture = Pin<Box<dyn Future<Output = Result<(), MigrationError>> + Send>>;

/// Plain function form of a migration body, used by compile-time registration.
pub type MigrationFn = fn(MigrationContext) -> MigrationFuture;

type BoxedBody = Arc<dyn Fn(MigrationContext) -> MigrationFuture + Send + Sync>;

/// Compile-time registration submitted by `#[migration]`.
pub struct MigrationRegistration {
    pub sequence: u64,
    pub name: &'static str,
    pub body: MigrationFn,
}

impl MigrationRegistration {
    pub const fn new(sequence: u64, name: &'static str, body: MigrationFn) -> Self {
        Self { sequence, name, body }
    }
}

inventory::collect!(MigrationRegistration);

/// Every migration linked into the binary through `#[migration]`.
pub fn registered_migrations() -> impl Iterator<Item = &'static MigrationRegistration> {
    inventory::iter::<MigrationRegistration>()
}

/// One ordered data-transformation step.
pub struct MigrationUnit {
    sequence: u64,
    name: String,
    body: BoxedBody,
    invoked: AtomicBool,
}

impl MigrationUnit {
    fn new(sequence: u64, name: String, body: BoxedBody) -> Self {
        Self {
            sequence,
            name,
            body,
            invoked: AtomicBool::new(false),
        }
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the body has already been started by this registry.
    pub fn was_invoked(&self) -> bool {
        self.invoked.load(Ordering::Acquire)
    }

    /// Start the body. A unit runs at most once per registry instance.
    pub(crate) fn invoke(&self, ctx: MigrationContext) -> Result<MigrationFuture, MigrationError> {
        if self.invoked.swap(true, Ordering::AcqRel) {
            return Err(MigrationError::AlreadyInvoked {
                sequence: self.sequence,
            });
        }
        Ok((self.body)(ctx))
    }
}

impl std::fmt::Debug for MigrationUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationUnit")
            .field("sequence", &self.sequence)
            .field("name", &self.name)
            .field("invoked", &self.was_invoked())
            .finish()
    }
}

/// Validated, ordered set of migration units.
#[derive(Debug)]
pub struct MigrationRegistry {
    units: Vec<MigrationUnit>,
}

impl MigrationRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Registry holding every `#[migration]` linked into the binary.
    pub fn from_inventory() -> Result<Self, DiscoveryError> {
        registered_migrations()
            .fold(Self::builder(), |builder, registration| builder.registration(registration))
            .build()
    }

    /// All units in strictly ascending sequence order.
    pub fn units(&self) -> &[MigrationUnit] {
        &self.units
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Look up the unit registered for `sequence`.
    pub fn resolve(&self, sequence: u64) -> Result<&MigrationUnit, DiscoveryError> {
        self.units
            .binary_search_by_key(&sequence, MigrationUnit::sequence)
            .map(|index| &self.units[index])
            .map_err(|_| DiscoveryError::Unresolved { sequence })
    }

    /// Units above the watermark, in the order they must be applied.
    pub fn pending<'a>(&'a self, watermark: &MigrationWatermark) -> impl Iterator<Item = &'a MigrationUnit> + use<'a> {
        let last_applied = watermark.last_applied;
        self.units
            .iter()
            .filter(move |unit| last_applied.is_none_or(|last| unit.sequence > last))
    }

    /// Highest registered sequence number.
    pub fn latest(&self) -> Option<u64> {
        self.units.last().map(MigrationUnit::sequence)
    }
}

/// Collects units and validates them into a [`MigrationRegistry`].
#[derive(Default)]
pub struct RegistryBuilder {
    entries: Vec<MigrationUnit>,
}

impl RegistryBuilder {
    /// Register an async body under `sequence`.
    pub fn unit<F, Fut>(mut self, sequence: u64, name: impl Into<String>, body: F) -> Self
    where
        F: Fn(MigrationContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), MigrationError>> + Send + 'static,
    {
        let body: BoxedBody = Arc::new(move |ctx: MigrationContext| -> MigrationFuture { Box::pin(body(ctx)) });
        self.entries.push(MigrationUnit::new(sequence, name.into(), body));
        self
    }

    /// Register a compile-time registration.
    pub fn registration(mut self, registration: &MigrationRegistration) -> Self {
        let body = registration.body;
        self.entries.push(MigrationUnit::new(
            registration.sequence,
            registration.name.to_string(),
            Arc::new(body),
        ));
        self
    }

    /// Validate and order the registered units.
    pub fn build(self) -> Result<MigrationRegistry, DiscoveryError> {
        let mut ordered: BTreeMap<u64, MigrationUnit> = BTreeMap::new();
        for unit in self.entries {
            if unit.name.trim().is_empty() {
                error!(sequence = unit.sequence, "migration registered with an empty name");
                return Err(DiscoveryError::InvalidName {
                    sequence: unit.sequence,
                });
            }
            if let Some(existing) = ordered.get(&unit.sequence) {
                let (first, second) = if existing.name <= unit.name {
                    (existing.name.clone(), unit.name.clone())
                } else {
                    (unit.name.clone(), existing.name.clone())
                };
                error!(sequence = unit.sequence, %first, %second, "duplicate migration sequence number");
                return Err(DiscoveryError::DuplicateSequence {
                    sequence: unit.sequence,
                    first,
                    second,
                });
            }
            ordered.insert(unit.sequence, unit);
        }
        Ok(MigrationRegistry {
            units: ordered.into_values().collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn noop(_ctx: MigrationContext) -> Result<(), MigrationError> {
        Ok(())
    }

    #[test]
    fn units_are_ordered_by_sequence() {
        let registry = MigrationRegistry::builder()
            .unit(2, "two", noop)
            .unit(0, "zero", noop)
            .unit(1, "one", noop)
            .build()
            .unwrap();

        let order: Vec<_> = registry.units().iter().map(MigrationUnit::sequence).collect();
        assert_eq!(order, vec![0, 1, 2]);
        assert_eq!(registry.latest(), Some(2));
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn duplicate_sequence_is_a_discovery_error() {
        let err = MigrationRegistry::builder()
            .unit(1, "users", noop)
            .unit(1, "accounts", noop)
            .build()
            .unwrap_err();

        match err {
            DiscoveryError::DuplicateSequence { sequence, first, second } => {
                assert_eq!(sequence, 1);
                assert_eq!(first, "accounts");
                assert_eq!(second, "users");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn empty_name_is_rejected() {
        let err = MigrationRegistry::builder().unit(4, " ", noop).build().unwrap_err();
        assert!(matches!(err, DiscoveryError::InvalidName { sequence: 4 }));
    }

    #[test]
    fn resolve_finds_registered_sequence() {
        let registry = MigrationRegistry::builder()
            .unit(3, "three", noop)
            .unit(10, "ten", noop)
            .build()
            .unwrap();

        assert_eq!(registry.resolve(10).unwrap().name(), "ten");
        assert!(matches!(
            registry.resolve(4),
            Err(DiscoveryError::Unresolved { sequence: 4 })
        ));
    }

    #[test]
    fn pending_skips_units_at_or_below_watermark() {
        let registry = MigrationRegistry::builder()
            .unit(0, "a", noop)
            .unit(1, "b", noop)
            .unit(2, "c", noop)
            .build()
            .unwrap();

        let none = MigrationWatermark::none();
        assert_eq!(registry.pending(&none).count(), 3);

        let at_one = MigrationWatermark {
            last_applied: Some(1),
            ..MigrationWatermark::default()
        };
        let pending: Vec<_> = registry.pending(&at_one).map(MigrationUnit::sequence).collect();
        assert_eq!(pending, vec![2]);
    }

    #[test]
    fn registration_wraps_plain_function() {
        fn body(ctx: MigrationContext) -> MigrationFuture {
            Box::pin(noop(ctx))
        }
        static REGISTRATION: MigrationRegistration = MigrationRegistration::new(9, "plain", body);

        let registry = MigrationRegistry::builder().registration(&REGISTRATION).build().unwrap();
        assert_eq!(registry.resolve(9).unwrap().name(), "plain");
    }

    #[test]
    fn empty_registry() {
        let registry = MigrationRegistry::builder().build().unwrap();
        assert!(registry.is_empty());
        assert_eq!(registry.latest(), None);
    }
}
