#![forbid(unsafe_code)]

//! Side-effect flags recorded on work nodes during a render pass.

use std::fmt;

use bitflags::bitflags;

bitflags! {
    /// Effects a work node needs applied at commit time.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct EffectFlags: u32 {
        /// Insert (or move) the node's host output into its host parent.
        const PLACEMENT = 1 << 0;
        /// Apply a prop diff, text change, or pending layout-effect teardown.
        const UPDATE = 1 << 1;
        /// At least one child is scheduled for removal.
        const CHILD_DELETION = 1 << 2;
        /// Marks an effect entry that removes a whole subtree.
        const DELETION = 1 << 3;
        /// Attach or detach an element reference.
        const REF = 1 << 4;
        /// Capture pre-mutation state (class snapshot).
        const SNAPSHOT = 1 << 5;
        /// Passive hook effects must run after commit.
        const PASSIVE = 1 << 6;
        /// Layout hook effects must run during commit.
        const LAYOUT = 1 << 7;
        /// Class lifecycle callback (mount, update, or catch).
        const CALLBACK = 1 << 8;
        /// Hide or reveal an offscreen subtree.
        const VISIBILITY = 1 << 9;
        /// Host asked for a post-mount callback.
        const HOST_MOUNT = 1 << 10;
        /// Attach retry listeners to thenables a boundary is waiting on.
        const RETRY = 1 << 11;
        /// The node captured a thrown value during this pass.
        const DID_CAPTURE = 1 << 12;
    }
}

impl EffectFlags {
    pub const BEFORE_MUTATION_MASK: Self = Self::SNAPSHOT;

    pub const MUTATION_MASK: Self = Self::PLACEMENT
        .union(Self::UPDATE)
        .union(Self::CHILD_DELETION)
        .union(Self::DELETION)
        .union(Self::REF)
        .union(Self::VISIBILITY);

    pub const LAYOUT_MASK: Self = Self::UPDATE
        .union(Self::CALLBACK)
        .union(Self::REF)
        .union(Self::LAYOUT)
        .union(Self::HOST_MOUNT)
        .union(Self::RETRY);

    pub const PASSIVE_MASK: Self = Self::PASSIVE.union(Self::CHILD_DELETION);

    /// Flags that earn a node an entry in the effect list.
    pub const ENTRY_MASK: Self = Self::BEFORE_MUTATION_MASK
        .union(Self::MUTATION_MASK)
        .union(Self::LAYOUT_MASK)
        .union(Self::PASSIVE);
}

impl Default for EffectFlags {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Display for EffectFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("-");
        }
        let mut first = true;
        for (name, _) in self.iter_names() {
            if !first {
                f.write_str("|")?;
            }
            f.write_str(name)?;
            first = false;
        }
        Ok(())
    }
}
