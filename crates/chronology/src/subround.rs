//! Subround identifiers, windows and the handler contract.

use async_trait::async_trait;
use rondel_types::RoundIndex;
use std::fmt;

/// The ordered set of subrounds within a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SubroundId {
    StartRound,
    Block,
    Signature,
    EndRound,
}

impl SubroundId {
    /// All subrounds in execution order.
    pub const ALL: [SubroundId; 4] = [
        SubroundId::StartRound,
        SubroundId::Block,
        SubroundId::Signature,
        SubroundId::EndRound,
    ];

    /// The subround preceding this one, if any.
    pub fn prev(self) -> Option<SubroundId> {
        match self {
            SubroundId::StartRound => None,
            SubroundId::Block => Some(SubroundId::StartRound),
            SubroundId::Signature => Some(SubroundId::Block),
            SubroundId::EndRound => Some(SubroundId::Signature),
        }
    }
}

impl fmt::Display for SubroundId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubroundId::StartRound => write!(f, "(START_ROUND)"),
            SubroundId::Block => write!(f, "(BLOCK)"),
            SubroundId::Signature => write!(f, "(SIGNATURE)"),
            SubroundId::EndRound => write!(f, "(END_ROUND)"),
        }
    }
}

/// Lifecycle of a subround within the current round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubroundStatus {
    /// Still collecting; the completion criterion is not met.
    #[default]
    NotFinished,
    /// The window lapsed and `extend` ran; a late finish is still possible.
    Extended,
    /// Completion criterion met.
    Finished,
    /// The round was given up.
    Canceled,
}

/// Static description of a subround's slice of the round window.
#[derive(Debug, Clone, Copy)]
pub struct SubroundSpec {
    pub id: SubroundId,
    pub name: &'static str,
    /// Window start as a fraction of the round duration.
    pub start_fraction: f64,
    /// Window end as a fraction of the round duration.
    pub end_fraction: f64,
}

/// The standard subround windows.
pub fn standard_subrounds() -> [SubroundSpec; 4] {
    [
        SubroundSpec {
            id: SubroundId::StartRound,
            name: "(START_ROUND)",
            start_fraction: 0.0,
            end_fraction: 0.05,
        },
        SubroundSpec {
            id: SubroundId::Block,
            name: "(BLOCK)",
            start_fraction: 0.05,
            end_fraction: 0.25,
        },
        SubroundSpec {
            id: SubroundId::Signature,
            name: "(SIGNATURE)",
            start_fraction: 0.25,
            end_fraction: 0.85,
        },
        SubroundSpec {
            id: SubroundId::EndRound,
            name: "(END_ROUND)",
            start_fraction: 0.85,
            end_fraction: 0.95,
        },
    ]
}

/// A subround's behavior, driven by the chronology task.
///
/// `do_job` runs once when the subround's window opens; `do_check` reports
/// progress and never errors; `extend` runs once when the window lapses
/// without the check passing.
#[async_trait]
pub trait SubroundHandler: Send {
    /// Which subround this handler implements.
    fn id(&self) -> SubroundId;

    /// Window description.
    fn spec(&self) -> SubroundSpec;

    /// Perform the subround's work. Returns false when the job failed and
    /// the round should not proceed on this node's initiative.
    async fn do_job(&mut self, round: RoundIndex) -> bool;

    /// Current status of the subround.
    fn do_check(&self) -> SubroundStatus;

    /// Time-up fallback, called once when the window lapses unfinished.
    fn extend(&mut self);

    /// Mark the subround Canceled after the round has been given up.
    /// Not invoked on the subround that caused the cancellation.
    fn cancel(&mut self);
}
