use crate::types::{InterfaceId, Priority};

/// Outcome of one selector evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection {
    pub interface: InterfaceId,
    /// The active path failed or the previous choice was invalid
    pub disconnect: bool,
}

impl Selection {
    const fn stay(interface: InterfaceId) -> Self {
        Self {
            interface,
            disconnect: false,
        }
    }
}

/// Chooses between a default and an optional backup interface
///
/// A failover switch (the active link went down while the other is up)
/// requests a disconnect. A priority switch while both links are healthy is
/// silent, and nothing changes while the active link stays up and priority
/// already favors it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdapterSelector {
    default: InterfaceId,
    backup: Option<InterfaceId>,
    priority: Priority,
}

impl AdapterSelector {
    #[must_use]
    pub const fn new(default: InterfaceId, backup: Option<InterfaceId>, priority: Priority) -> Self {
        Self {
            default,
            backup,
            priority,
        }
    }

    pub const fn default_interface(&self) -> InterfaceId {
        self.default
    }

    pub const fn backup_interface(&self) -> Option<InterfaceId> {
        self.backup
    }

    fn is_valid(&self, interface: InterfaceId) -> bool {
        interface == self.default || Some(interface) == self.backup
    }

    /// Evaluate once, given the current choice and a link-state query
    pub fn evaluate<F>(&self, current: Option<InterfaceId>, link_up: F) -> Selection
    where
        F: Fn(InterfaceId) -> bool,
    {
        let current = match current {
            Some(interface) if self.is_valid(interface) => interface,
            _ => {
                return Selection {
                    interface: self.default,
                    disconnect: true,
                }
            }
        };

        let Some(backup) = self.backup else {
            return Selection::stay(current);
        };
        if backup == self.default {
            return Selection::stay(current);
        }

        let (other, favored) = if current == self.default {
            (backup, self.priority == Priority::Backup)
        } else {
            (self.default, self.priority == Priority::Default)
        };

        let current_up = link_up(current);
        let other_up = link_up(other);

        if !current_up && other_up {
            Selection {
                interface: other,
                disconnect: true,
            }
        } else if favored && current_up && other_up {
            Selection::stay(other)
        } else {
            Selection::stay(current)
        }
    }
}
