//! Per-element processing policy.

use crate::types::ElementId;

/// Geometry simplification flag with a single-shot override.
///
/// Simplification is on by default. `disable_for_next_element_only` turns it
/// off for the element about to be handled; the combiner calls `restore`
/// before the following element, so an override never leaks.
#[derive(Debug, Clone)]
pub struct ProcessingPolicy {
    simplify_geometry: bool,
    overridden_for: Option<ElementId>,
}

impl ProcessingPolicy {
    /// Create a policy with simplification enabled.
    pub fn new() -> Self {
        Self {
            simplify_geometry: true,
            overridden_for: None,
        }
    }

    /// Whether geometry should currently be simplified.
    pub fn simplify_geometry(&self) -> bool {
        self.simplify_geometry
    }

    /// Element the current override applies to.
    pub fn overridden_for(&self) -> Option<ElementId> {
        self.overridden_for
    }

    /// Disable simplification for the upcoming element only.
    pub fn disable_for_next_element_only(&mut self, element: ElementId) {
        self.simplify_geometry = false;
        self.overridden_for = Some(element);
    }

    /// Re-enable simplification.
    ///
    /// Returns the element the override was for, if one was active.
    pub fn restore(&mut self) -> Option<ElementId> {
        self.simplify_geometry = true;
        self.overridden_for.take()
    }
}

impl Default for ProcessingPolicy {
    fn default() -> Self {
        Self::new()
    }
}
