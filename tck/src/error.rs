//! Error taxonomy for the style harness.
//!
//! Schema problems in fixtures, fatal engine conditions and per-scenario
//! failures are kept apart so callers can decide what aborts loading, what
//! aborts a scenario and what is merely reported.

use thiserror::Error;

use crate::fixtures::types::AtomId;

/// Malformed fixture. Never recoverable: loading stops before any engine work.
#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum FixtureError {
    /// Fixture text is not a YAML mapping at all
    #[error("fixture is not valid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Top level is not a mapping of section names
    #[error("fixture top level must be a mapping of sections")]
    NotAMapping,

    /// Section name with no handler
    #[error("unknown fixture section '{0}'")]
    UnknownSection(String),

    /// Section value has the wrong YAML shape
    #[error("section '{section}' must be {expected}")]
    WrongShape {
        section: String,
        expected: &'static str,
    },

    /// A line inside a section has the wrong number of fields
    #[error("section '{section}' line {line}: expected {expected} fields, found {found}")]
    FieldCount {
        section: String,
        line: usize,
        expected: usize,
        found: usize,
    },

    /// A numeric field did not parse
    #[error("section '{section}': invalid number '{value}'")]
    InvalidNumber { section: String, value: String },

    /// A section required to run the matrix is absent
    #[error("missing required section '{0}'")]
    MissingSection(String),

    /// Two style kinds in one fixture
    #[error("fixture declares both '{first}' and '{second}' styles")]
    ConflictingStyleKinds { first: String, second: String },

    /// Tolerance must be strictly positive
    #[error("epsilon must be strictly positive, got {0}")]
    NonPositiveEpsilon(f64),

    /// Atom identifiers are 1-based
    #[error("section '{section}': atom id {id} is out of range")]
    InvalidAtomId { section: String, id: AtomId },

    /// The same atom listed twice in a force block
    #[error("section '{section}': atom id {id} listed more than once")]
    DuplicateAtom { section: String, id: AtomId },

    /// Force block and atom count disagree
    #[error("section '{section}' lists {found} atoms but natoms is {natoms}")]
    AtomCountMismatch {
        section: String,
        natoms: usize,
        found: usize,
    },
}

/// Fatal condition reported by an engine while executing a command.
#[derive(Debug, Clone, Error)]
#[allow(missing_docs)]
pub enum EngineError {
    /// Command verb the engine does not understand
    #[error("unknown command '{0}'")]
    UnknownCommand(String),

    /// Command understood but its arguments are invalid
    #[error("{command}: {reason}")]
    InvalidCommand { command: String, reason: String },

    /// Style name not registered in this engine build
    #[error("unrecognized {kind} style '{name}'")]
    UnknownStyle { kind: String, name: String },

    /// Variable referenced before definition
    #[error("substitution for undefined variable '{0}'")]
    UndefinedVariable(String),

    /// Run attempted before the system is fully specified
    #[error("cannot run: {0}")]
    NotReady(String),

    /// File inclusion or persistence failure
    #[error("{path}: {reason}")]
    Io { path: String, reason: String },
}

/// Failure that aborts one scenario of the matrix, leaving the others intact.
#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum ScenarioError {
    /// Engine reported a different atom count than the fixture expects
    #[error("atom count mismatch in {stage}: expected {expected}, engine reports {actual}")]
    AtomCount {
        stage: String,
        expected: usize,
        actual: usize,
    },

    /// Distributed run where the reporting process does not own every atom
    #[error("not all atoms are local in {stage}: natoms {natoms}, nlocal {nlocal}")]
    NotAllLocal {
        stage: String,
        natoms: usize,
        nlocal: usize,
    },

    /// Engine reported an atom the reference data does not know
    #[error("atom id {id} reported by engine has no reference entry in {group}")]
    UnknownAtom { group: String, id: AtomId },

    /// Style under test vanished from the engine
    #[error("no {0} style active in the engine")]
    NoStyle(String),

    /// Diagnostic accumulator missing after a run
    #[error("compute '{0}' is not defined in the engine")]
    MissingCompute(String),

    /// Fatal engine condition while scripting the scenario
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    /// Anything else (I/O around persistence artifacts, engine creation)
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
