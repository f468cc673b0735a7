//! Assembly kernel: core domain vocabulary.
//!
//! Pure data. Identifiers, enums and the attach-point handle used for
//! every cross-piece reference.

use std::fmt;

use serde::{Deserialize, Serialize};

// ── Identifiers ────────────────────────────────────────────────────

/// Stable runtime id of a registered piece. Never reused while the piece lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PieceId(pub u32);

impl fmt::Display for PieceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Screw index. Screw `i` is the one offered for plan step `i`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScrewId(pub u32);

impl fmt::Display for ScrewId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "screw{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubstructureId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JointId(pub u32);

/// Which hand is holding something.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Hand {
    Left,
    Right,
}

/// Reference to an attach point by owning piece and slot index.
///
/// Used instead of direct references so every link survives
/// serialization and reload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AttachHandle {
    pub piece: PieceId,
    pub index: usize,
}

impl AttachHandle {
    pub fn new(piece: PieceId, index: usize) -> Self {
        Self { piece, index }
    }
}

impl fmt::Display for AttachHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.piece, self.index)
    }
}

// ── Piece classification ───────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PieceKind {
    #[serde(rename = "PIPE")]
    Pipe,
    #[serde(rename = "PANEL")]
    Panel,
    #[serde(rename = "C_2WAY")]
    Connector2Way,
    #[serde(rename = "C_ELBOW")]
    Elbow,
    #[serde(rename = "C_TEE")]
    Tee,
    #[serde(rename = "C_3WAY")]
    Connector3Way,
    #[serde(rename = "C_4WAY")]
    Connector4Way,
    #[serde(rename = "C_5WAY")]
    Connector5Way,
    #[serde(rename = "SCREW")]
    Screw,
    #[serde(rename = "SCREW_PANEL")]
    ScrewPanel,
}

impl PieceKind {
    pub fn is_pipe(self) -> bool {
        self == PieceKind::Pipe
    }

    pub fn is_panel(self) -> bool {
        self == PieceKind::Panel
    }

    pub fn is_connector(self) -> bool {
        matches!(
            self,
            PieceKind::Connector2Way
                | PieceKind::Connector3Way
                | PieceKind::Connector4Way
                | PieceKind::Connector5Way
                | PieceKind::Tee
                | PieceKind::Elbow
        )
    }

    pub fn is_screw(self) -> bool {
        matches!(self, PieceKind::Screw | PieceKind::ScrewPanel)
    }

    /// Pipes join connectors and connectors join pipes; nothing else snaps.
    pub fn complements(self, other: PieceKind) -> bool {
        (self.is_pipe() && other.is_connector()) || (self.is_connector() && other.is_pipe())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PieceColor {
    #[default]
    Black,
    Red,
    Yellow,
    Green,
    Blue,
}

// ── Connection state ───────────────────────────────────────────────

/// Progression of a joint from unconnected to permanently fixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LockState {
    /// Not joined to anything.
    #[default]
    Free,
    /// Inserted; can still be pulled apart.
    LooseLock,
    /// A screw has been put in.
    PartialLock,
    /// The screw has been driven home.
    FullLock,
}

/// Rotations about an attach axis considered interchangeable when aligning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AlignSymmetry {
    /// Canonical orientation only.
    #[serde(rename = "NONE")]
    None,
    /// Canonical and half turn.
    #[serde(rename = "S_180")]
    Half,
    /// All four quarter turns.
    #[default]
    #[serde(rename = "S_90")]
    Quarter,
}

/// Which side moves when two attach points are snapped together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlignBehavior {
    None,
    #[default]
    AlignThis,
    AlignOther,
}

/// How a verified connection is realized physically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AttachMode {
    /// A locked joint between the two rigid bodies.
    #[default]
    ConfigurableJoint,
    /// Both pieces become children of a shared substructure.
    Hierarchical,
}

// ── Instruction progress ───────────────────────────────────────────

/// Sub-state within one plan step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SubStep {
    #[default]
    AttachPiece,
    InsertScrew,
    UseKey,
}

impl SubStep {
    /// Successor in the `AttachPiece → InsertScrew → UseKey → AttachPiece` cycle.
    pub fn next(self) -> SubStep {
        match self {
            SubStep::AttachPiece => SubStep::InsertScrew,
            SubStep::InsertScrew => SubStep::UseKey,
            SubStep::UseKey => SubStep::AttachPiece,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SubStep::AttachPiece => "AttachPiece",
            SubStep::InsertScrew => "InsertScrew",
            SubStep::UseKey => "UseKey",
        }
    }
}

impl fmt::Display for SubStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Physics and interaction components a loose piece carries.
///
/// Hierarchical attachment strips them from child pieces; the
/// substructure carries its own instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BodyState {
    pub rigid_body: bool,
    pub throwable: bool,
    pub interactable: bool,
}

impl Default for BodyState {
    fn default() -> Self {
        Self {
            rigid_body: true,
            throwable: true,
            interactable: true,
        }
    }
}

impl BodyState {
    pub fn stripped() -> Self {
        Self {
            rigid_body: false,
            throwable: false,
            interactable: false,
        }
    }
}
