use super::{CapabilityKind, Extension, Position, Scope};
use crate::errors::TestError;
use std::sync::Arc;

/// One registered extension.
#[derive(Clone)]
pub struct Registration {
    pub extension: Arc<dyn Extension>,
    pub position: Position,
    pub scope: Scope,
}

/// Append-only, parent-chained collection of extensions.
///
/// A registry is filled once while its node is prepared and then shared
/// immutably behind an [Arc]; child registries see everything registered
/// in their ancestors, never the other way around.
pub struct ExtensionRegistry {
    parent: Option<Arc<ExtensionRegistry>>,
    scope: Scope,
    registrations: Vec<Registration>,
}

impl ExtensionRegistry {
    /// An empty registry without a parent.
    pub fn root() -> Self {
        ExtensionRegistry {
            parent: None,
            scope: Scope::Engine,
            registrations: Vec::new(),
        }
    }

    /// An empty registry inheriting from `parent`.
    pub fn child(parent: Arc<ExtensionRegistry>, scope: Scope) -> Self {
        ExtensionRegistry {
            parent: Some(parent),
            scope,
            registrations: Vec::new(),
        }
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    pub fn parent(&self) -> Option<&Arc<ExtensionRegistry>> {
        self.parent.as_ref()
    }

    /// Register `extension` at this registry's scope.
    ///
    /// Fails if the extension claims the outermost or innermost position for
    /// a capability whose extreme position is already taken in this chain.
    pub fn register(
        &mut self,
        extension: Arc<dyn Extension>,
        position: Position,
    ) -> Result<(), TestError> {
        if position != Position::Default {
            for kind in CapabilityKind::ALL {
                if !kind.is_supported_by(&*extension) {
                    continue;
                }
                if let Some(existing) = self.find_claim(kind, position) {
                    return Err(TestError::configuration(format!(
                        "Extension [{}] cannot claim the {:?} position for {:?}: already claimed by [{}]",
                        extension.name(),
                        position,
                        kind,
                        existing.extension.name()
                    )));
                }
            }
        }
        tracing::trace!(
            extension = extension.name(),
            scope = ?self.scope,
            ?position,
            "registering extension"
        );
        self.registrations.push(Registration {
            extension,
            position,
            scope: self.scope,
        });
        Ok(())
    }

    fn find_claim(&self, kind: CapabilityKind, position: Position) -> Option<&Registration> {
        self.registrations
            .iter()
            .find(|r| r.position == position && kind.is_supported_by(&*r.extension))
            .or_else(|| self.parent.as_ref().and_then(|p| p.find_claim(kind, position)))
    }

    /// Registrations supporting `kind`, ordered outermost registry first.
    fn collect<'a>(&'a self, kind: CapabilityKind, out: &mut Vec<&'a Registration>) {
        if let Some(parent) = &self.parent {
            parent.collect(kind, out);
        }
        out.extend(
            self.registrations
                .iter()
                .filter(|r| kind.is_supported_by(&*r.extension)),
        );
    }

    /// All extensions supporting `kind`, in application order.
    ///
    /// Outermost claims come first and innermost claims last; everything else
    /// keeps ancestor-first registration order. For "after" capabilities the
    /// whole sequence is reversed.
    pub fn extensions(&self, kind: CapabilityKind) -> Vec<Arc<dyn Extension>> {
        let mut found = Vec::new();
        self.collect(kind, &mut found);
        // Stable sort keeps registration order within each position.
        found.sort_by_key(|r| match r.position {
            Position::Outermost => 0,
            Position::Default => 1,
            Position::Innermost => 2,
        });
        let mut extensions: Vec<Arc<dyn Extension>> =
            found.into_iter().map(|r| Arc::clone(&r.extension)).collect();
        if kind.is_after() {
            extensions.reverse();
        }
        extensions
    }

    /// Registrations made directly in this registry.
    pub fn local(&self) -> &[Registration] {
        &self.registrations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        errors::ErrorKind,
        executor::ExtensionContext,
        extension::{AfterEachCallback, BeforeEachCallback},
    };

    struct Hook(&'static str);

    impl BeforeEachCallback for Hook {
        fn before_each(&self, _: &ExtensionContext) -> Result<(), TestError> {
            Ok(())
        }
    }

    impl AfterEachCallback for Hook {
        fn after_each(&self, _: &ExtensionContext) -> Result<(), TestError> {
            Ok(())
        }
    }

    impl Extension for Hook {
        fn name(&self) -> &str {
            self.0
        }

        fn as_before_each(&self) -> Option<&dyn BeforeEachCallback> {
            Some(self)
        }

        fn as_after_each(&self) -> Option<&dyn AfterEachCallback> {
            Some(self)
        }
    }

    fn names(exts: &[Arc<dyn Extension>]) -> Vec<String> {
        exts.iter().map(|e| e.name().to_string()).collect()
    }

    #[test]
    fn before_is_outer_to_inner_and_after_is_inner_to_outer() {
        let mut root = ExtensionRegistry::root();
        root.register(Arc::new(Hook("outer")), Position::Default).unwrap();
        let mut child = ExtensionRegistry::child(Arc::new(root), Scope::Class);
        child.register(Arc::new(Hook("inner")), Position::Default).unwrap();

        assert_eq!(
            names(&child.extensions(CapabilityKind::BeforeEach)),
            vec!["outer", "inner"]
        );
        assert_eq!(
            names(&child.extensions(CapabilityKind::AfterEach)),
            vec!["inner", "outer"]
        );
        assert!(child.extensions(CapabilityKind::Condition).is_empty());
    }

    #[test]
    fn extreme_positions_wrap_everything() {
        let mut root = ExtensionRegistry::root();
        root.register(Arc::new(Hook("plain")), Position::Default).unwrap();
        let mut child = ExtensionRegistry::child(Arc::new(root), Scope::Method);
        child.register(Arc::new(Hook("first")), Position::Outermost).unwrap();
        child.register(Arc::new(Hook("last")), Position::Innermost).unwrap();
        child.register(Arc::new(Hook("local")), Position::Default).unwrap();

        assert_eq!(
            names(&child.extensions(CapabilityKind::BeforeEach)),
            vec!["first", "plain", "local", "last"]
        );
        assert_eq!(
            names(&child.extensions(CapabilityKind::AfterEach)),
            vec!["last", "local", "plain", "first"]
        );
    }

    #[test]
    fn second_extreme_claim_is_a_configuration_error() {
        let mut root = ExtensionRegistry::root();
        root.register(Arc::new(Hook("one")), Position::Outermost).unwrap();
        let mut child = ExtensionRegistry::child(Arc::new(root), Scope::Class);
        let err = child
            .register(Arc::new(Hook("two")), Position::Outermost)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(err.message().contains("[two]"));
        assert!(err.message().contains("[one]"));
        // The other extreme is still free.
        assert!(child.register(Arc::new(Hook("three")), Position::Innermost).is_ok());
    }

    #[test]
    fn siblings_do_not_see_each_other() {
        let root = Arc::new(ExtensionRegistry::root());
        let mut left = ExtensionRegistry::child(Arc::clone(&root), Scope::Class);
        left.register(Arc::new(Hook("left")), Position::Default).unwrap();
        let right = ExtensionRegistry::child(root, Scope::Class);
        assert!(right.extensions(CapabilityKind::BeforeEach).is_empty());
        assert_eq!(left.local().len(), 1);
    }
}
