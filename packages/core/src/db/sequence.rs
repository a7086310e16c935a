//! Contiguous 1-based sequences for screens and questions
//!
//! Every order integer the engine persists comes out of [`SequenceAllocator`].
//! A computation takes the collection as it is stored, applies one create,
//! reposition, removal or move, and returns the full renumbered sequence plus
//! the minimal set of [`OrderAssignment`]s that differ from what is stored.
//!
//! Proposed positions are hints from the client. They are validated, never
//! clamped, and never persisted verbatim: the returned `final_position` is
//! authoritative.

use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// Errors raised while computing a sequence
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OrderingError {
    #[error("Proposed position {proposed} is outside 1..={max}")]
    OutOfRange { proposed: i64, max: usize },

    #[error("Member '{id}' is not part of this collection")]
    UnknownMember { id: String },

    #[error("Member '{id}' is already part of this collection")]
    AlreadyMember { id: String },

    #[error("Member '{id}' appears more than once in the collection")]
    DuplicateMember { id: String },

    #[error("Collection exceeds the maximum of {max} members")]
    CapacityExceeded { max: u32 },
}

/// A collection member with its currently stored position
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceMember {
    pub id: String,
    pub position: u32,
}

impl SequenceMember {
    pub fn new(id: impl Into<String>, position: u32) -> Self {
        Self {
            id: id.into(),
            position,
        }
    }
}

/// A position that must be written for one member
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderAssignment {
    pub id: String,
    pub position: u32,
}

/// Outcome of a single-collection computation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    /// Position of the subject member (for removals: the slot it vacated)
    pub final_position: u32,
    /// Member ids in their new order; index `i` holds position `i + 1`
    pub sequence: Vec<String>,
    /// Members whose stored position differs from the new one
    pub assignments: Vec<OrderAssignment>,
}

impl Placement {
    pub fn len(&self) -> usize {
        self.sequence.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequence.is_empty()
    }

    /// New position of `id`, if it is in the sequence
    pub fn position_of(&self, id: &str) -> Option<u32> {
        self.sequence
            .iter()
            .position(|member| member == id)
            .map(|index| index as u32 + 1)
    }
}

/// Outcome of moving a member between two collections
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MovePlacement {
    pub final_position: u32,
    pub source: Placement,
    pub target: Placement,
}

/// Assigns and repairs contiguous order integers
pub struct SequenceAllocator;

impl SequenceAllocator {
    /// Insert `new_id`, appending when no hint is given.
    ///
    /// A hint must lie in `1..=size+1`; members at or after it shift up by one.
    pub fn assign_on_create(
        members: &[SequenceMember],
        new_id: &str,
        proposed: Option<i64>,
    ) -> Result<Placement, OrderingError> {
        let mut sequence = Self::ordered_ids(members)?;
        if sequence.iter().any(|id| id == new_id) {
            return Err(OrderingError::AlreadyMember {
                id: new_id.to_string(),
            });
        }

        let slot = match proposed {
            Some(hint) => Self::validate_hint(hint, sequence.len() + 1)?,
            None => sequence.len() + 1,
        };
        sequence.insert(slot - 1, new_id.to_string());

        Self::placement(members, sequence, new_id)
    }

    /// Move `member_id` to `proposed` (within `1..=size`) and renumber everything
    pub fn reposition(
        members: &[SequenceMember],
        member_id: &str,
        proposed: i64,
    ) -> Result<Placement, OrderingError> {
        let mut sequence = Self::ordered_ids(members)?;
        let slot = Self::validate_hint(proposed, sequence.len())?;
        let current = Self::index_of(&sequence, member_id)?;

        let id = sequence.remove(current);
        sequence.insert(slot - 1, id);

        Self::placement(members, sequence, member_id)
    }

    /// Remove `member_id` and close the gap
    pub fn remove(members: &[SequenceMember], member_id: &str) -> Result<Placement, OrderingError> {
        let mut sequence = Self::ordered_ids(members)?;
        let current = Self::index_of(&sequence, member_id)?;
        sequence.remove(current);

        let assignments = Self::diff(members, &sequence)?;
        Ok(Placement {
            final_position: current as u32 + 1,
            sequence,
            assignments,
        })
    }

    /// Remove from `source` then insert into `target` as [`Self::assign_on_create`] would
    pub fn move_between(
        source: &[SequenceMember],
        target: &[SequenceMember],
        member_id: &str,
        proposed: Option<i64>,
    ) -> Result<MovePlacement, OrderingError> {
        let source_placement = Self::remove(source, member_id)?;
        let target_placement = Self::assign_on_create(target, member_id, proposed)?;

        Ok(MovePlacement {
            final_position: target_placement.final_position,
            source: source_placement,
            target: target_placement,
        })
    }

    /// Renumber a possibly damaged collection to `1..=N`, keeping relative order
    pub fn renumber(members: &[SequenceMember]) -> Result<Vec<OrderAssignment>, OrderingError> {
        let sequence = Self::ordered_ids(members)?;
        Self::diff(members, &sequence)
    }

    /// True when `positions` is exactly `{1..N}` with no duplicates
    pub fn is_contiguous(positions: impl IntoIterator<Item = u32>) -> bool {
        let mut sorted: Vec<u32> = positions.into_iter().collect();
        sorted.sort_unstable();
        sorted
            .iter()
            .enumerate()
            .all(|(index, position)| *position as usize == index + 1)
    }

    /// Stable order by stored position; ties go to the lower id
    fn ordered_ids(members: &[SequenceMember]) -> Result<Vec<String>, OrderingError> {
        let mut seen = HashSet::with_capacity(members.len());
        for member in members {
            if !seen.insert(member.id.as_str()) {
                return Err(OrderingError::DuplicateMember {
                    id: member.id.clone(),
                });
            }
        }

        let mut sorted: Vec<&SequenceMember> = members.iter().collect();
        sorted.sort_by(|a, b| a.position.cmp(&b.position).then_with(|| a.id.cmp(&b.id)));
        Ok(sorted.into_iter().map(|member| member.id.clone()).collect())
    }

    fn validate_hint(proposed: i64, max: usize) -> Result<usize, OrderingError> {
        if proposed < 1 || proposed as u64 > max as u64 {
            return Err(OrderingError::OutOfRange { proposed, max });
        }
        Ok(proposed as usize)
    }

    fn index_of(sequence: &[String], member_id: &str) -> Result<usize, OrderingError> {
        sequence
            .iter()
            .position(|id| id == member_id)
            .ok_or_else(|| OrderingError::UnknownMember {
                id: member_id.to_string(),
            })
    }

    fn placement(
        prior: &[SequenceMember],
        sequence: Vec<String>,
        subject: &str,
    ) -> Result<Placement, OrderingError> {
        let final_position = Self::index_of(&sequence, subject)? as u32 + 1;
        let assignments = Self::diff(prior, &sequence)?;
        Ok(Placement {
            final_position,
            sequence,
            assignments,
        })
    }

    fn diff(
        prior: &[SequenceMember],
        sequence: &[String],
    ) -> Result<Vec<OrderAssignment>, OrderingError> {
        if sequence.len() > u32::MAX as usize {
            return Err(OrderingError::CapacityExceeded { max: u32::MAX });
        }
        let stored: HashMap<&str, u32> = prior
            .iter()
            .map(|member| (member.id.as_str(), member.position))
            .collect();

        Ok(sequence
            .iter()
            .enumerate()
            .filter_map(|(index, id)| {
                let position = index as u32 + 1;
                match stored.get(id.as_str()) {
                    Some(existing) if *existing == position => None,
                    _ => Some(OrderAssignment {
                        id: id.clone(),
                        position,
                    }),
                }
            })
            .collect())
    }
}
