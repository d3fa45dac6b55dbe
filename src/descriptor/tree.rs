//! Validation of descriptor trees received from discovery.
use super::TestDescriptor;
use crate::errors::ArborError;
use std::collections::HashSet;

/// Check that every id is well-formed and unique, and that every child id
/// strictly extends its parent's id. Nothing about how the tree was
/// produced is checked beyond that.
pub fn validate(root: &TestDescriptor) -> Result<(), ArborError> {
    let mut seen = HashSet::new();
    check(root, &mut seen)
}

fn check<'a>(
    node: &'a TestDescriptor,
    seen: &mut HashSet<&'a super::UniqueId>,
) -> Result<(), ArborError> {
    if !node.id().is_well_formed() {
        return Err(ArborError::InvalidUniqueId(node.id().to_string()));
    }
    if !seen.insert(node.id()) {
        return Err(ArborError::DuplicateUniqueId(node.id().to_string()));
    }
    for child in node.children() {
        let child_id = child.id();
        if child_id.segments().len() <= node.id().segments().len() || !child_id.has_prefix(node.id())
        {
            return Err(ArborError::DetachedChild {
                parent: node.id().to_string(),
                child: child_id.to_string(),
            });
        }
        check(child, seen)?;
    }
    Ok(())
}

/// Number of nodes in the tree.
pub fn count(root: &TestDescriptor) -> usize {
    let mut n = 0;
    root.walk(&mut |_| n += 1);
    n
}
