//! Reasons for keeping a proxy interface disabled.
//!
//! Each reason is an independent bit; the interface is enabled exactly
//! when no bit is set. Mutators report the edge they caused — the
//! `0 -> >=1` transition on a mark, the `>=1 -> 0` transition on a
//! clear — and the owner turns those edges into its enable/disable
//! hooks. Soft reasons arise from normal proxy operation and may be
//! cleared wholesale on external command; hard reasons must be cleared
//! by their specific cause.

use bitflags::bitflags;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DisableLabel: u32 {
        // Soft reasons, bits 0-15.
        /// An operator or another process asked for the interface to be
        /// disabled.
        const SOFTWARE_DISABLED = 1 << 0;
        /// One of the RFC 4389 loop-prevention conditions fired; the
        /// interface rests until the suppression timer clears it.
        const LOOP_DETECTED = 1 << 1;

        // Hard reasons, bits 16-31.
        /// The OS reports the link as down.
        const LINK_DOWN = 1 << 16;
        /// The interface is not a member of any proxy group.
        const GROUPLESS = 1 << 17;

        const SOFT = Self::SOFTWARE_DISABLED.bits() | Self::LOOP_DETECTED.bits();
        const HARD = Self::LINK_DOWN.bits() | Self::GROUPLESS.bits();
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct InterfaceDisableLabels {
    reasons: DisableLabel,
}

impl InterfaceDisableLabels {
    pub fn new() -> InterfaceDisableLabels {
        InterfaceDisableLabels::default()
    }

    /// Whether no reason remains and the interface should be enabled.
    pub fn is_clear(&self) -> bool {
        self.reasons.is_empty()
    }

    pub fn is_marked(&self, label: DisableLabel) -> bool {
        self.reasons.intersects(label)
    }

    /// Sets `label`. Returns true iff this was the transition from zero
    /// reasons to one or more, i.e. the caller must fire its disable
    /// hook.
    pub fn mark(&mut self, label: DisableLabel) -> bool {
        let was_clear = self.reasons.is_empty();
        self.reasons |= label;
        was_clear && !self.reasons.is_empty()
    }

    /// Clears `label`. Returns true iff this was the transition from one
    /// or more reasons to zero, i.e. the caller must fire its enable
    /// hook.
    pub fn clear(&mut self, label: DisableLabel) -> bool {
        let had_reason = !self.reasons.is_empty();
        self.reasons &= !label;
        had_reason && self.reasons.is_empty()
    }

    /// Unsets both soft reasons. Returns true iff no hard reason
    /// remains, in which case the caller fires its enable hook.
    pub fn clear_soft(&mut self) -> bool {
        self.reasons &= !DisableLabel::SOFT;
        !self.reasons.intersects(DisableLabel::HARD)
    }

    /// Unsets everything. The caller decides whether to fire its enable
    /// hook.
    pub fn clear_all(&mut self) {
        self.reasons = DisableLabel::empty();
    }

    /// Returns true iff the bitset is already zero, in which case the
    /// caller fires its enable hook.
    pub fn try_enable(&self) -> bool {
        self.reasons.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mark_fires_only_on_first_reason() {
        let mut labels = InterfaceDisableLabels::new();
        assert!(labels.is_clear());
        assert!(labels.mark(DisableLabel::SOFTWARE_DISABLED));
        // A second reason does not re-fire the disable edge.
        assert!(!labels.mark(DisableLabel::LINK_DOWN));
        assert!(!labels.mark(DisableLabel::SOFTWARE_DISABLED));
        assert!(labels.is_marked(DisableLabel::SOFTWARE_DISABLED));
        assert!(labels.is_marked(DisableLabel::LINK_DOWN));
        assert!(!labels.is_clear());
    }

    #[test]
    fn clear_fires_only_on_last_reason() {
        let mut labels = InterfaceDisableLabels::new();
        labels.mark(DisableLabel::SOFTWARE_DISABLED);
        labels.mark(DisableLabel::LOOP_DETECTED);

        assert!(!labels.clear(DisableLabel::SOFTWARE_DISABLED));
        assert!(labels.clear(DisableLabel::LOOP_DETECTED));
        assert!(labels.is_clear());
        // Clearing an unset label is not an enable edge.
        assert!(!labels.clear(DisableLabel::LOOP_DETECTED));
    }

    #[test]
    fn clear_soft_respects_hard_reasons() {
        let mut labels = InterfaceDisableLabels::new();
        labels.mark(DisableLabel::SOFTWARE_DISABLED);
        labels.mark(DisableLabel::LOOP_DETECTED);
        labels.mark(DisableLabel::GROUPLESS);

        assert!(!labels.clear_soft());
        assert!(!labels.is_marked(DisableLabel::SOFT));
        assert!(labels.is_marked(DisableLabel::GROUPLESS));

        assert!(labels.clear(DisableLabel::GROUPLESS));
        assert!(labels.clear_soft());
    }

    #[test]
    fn try_enable_requires_empty_bitset() {
        let mut labels = InterfaceDisableLabels::new();
        assert!(labels.try_enable());
        labels.mark(DisableLabel::LINK_DOWN);
        assert!(!labels.try_enable());
        labels.clear(DisableLabel::LINK_DOWN);
        assert!(labels.try_enable());
    }

    #[test]
    fn clear_all_is_idempotent() {
        let mut labels = InterfaceDisableLabels::new();
        labels.mark(DisableLabel::SOFTWARE_DISABLED);
        labels.mark(DisableLabel::GROUPLESS);
        labels.clear_all();
        assert!(labels.is_clear());
        labels.clear_all();
        assert!(labels.is_clear());
    }
}
