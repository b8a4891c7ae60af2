//! Installation steps and their ordering.

use std::fmt;

/// One stage of getting an archive installed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstallationStep {
    Downloading,
    Unarchiving,
    Moving,
    TrashingArchive,
    CheckingSecurity,
    Finishing,
}

impl InstallationStep {
    /// Every step in execution order.
    pub const ALL: [InstallationStep; 6] = [
        Self::Downloading,
        Self::Unarchiving,
        Self::Moving,
        Self::TrashingArchive,
        Self::CheckingSecurity,
        Self::Finishing,
    ];

    /// The step that follows this one, if any.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Downloading => Some(Self::Unarchiving),
            Self::Unarchiving => Some(Self::Moving),
            Self::Moving => Some(Self::TrashingArchive),
            Self::TrashingArchive => Some(Self::CheckingSecurity),
            Self::CheckingSecurity => Some(Self::Finishing),
            Self::Finishing => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Downloading => "Downloading",
            Self::Unarchiving => "Unarchiving",
            Self::Moving => "Moving",
            Self::TrashingArchive => "Trashing archive",
            Self::CheckingSecurity => "Checking security",
            Self::Finishing => "Finishing",
        }
    }
}

impl fmt::Display for InstallationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The steps one run goes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepSequence {
    steps: &'static [InstallationStep],
}

impl StepSequence {
    /// Download, then install.
    pub fn full() -> Self {
        Self {
            steps: &InstallationStep::ALL,
        }
    }

    /// Download only.
    pub fn download_only() -> Self {
        Self {
            steps: &InstallationStep::ALL[..1],
        }
    }

    pub fn for_mode(should_install: bool) -> Self {
        if should_install {
            Self::full()
        } else {
            Self::download_only()
        }
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn steps(&self) -> &'static [InstallationStep] {
        self.steps
    }

    /// 1-based position of `step`, if it is part of this sequence.
    pub fn position(&self, step: InstallationStep) -> Option<usize> {
        self.steps.iter().position(|s| *s == step).map(|i| i + 1)
    }

    /// `(n/total)` for `step`.
    pub fn label(&self, step: InstallationStep) -> String {
        match self.position(step) {
            Some(position) => format!("({}/{})", position, self.len()),
            None => String::new(),
        }
    }
}

/// Walks a [`StepSequence`] one step at a time.
#[derive(Debug, Clone)]
pub struct StepProgress {
    sequence: StepSequence,
    current: Option<InstallationStep>,
}

impl StepProgress {
    pub fn new(sequence: StepSequence) -> Self {
        Self {
            sequence,
            current: None,
        }
    }

    /// Pick up a sequence whose steps up to and including `completed` are done.
    pub fn after(sequence: StepSequence, completed: InstallationStep) -> Self {
        Self {
            sequence,
            current: Some(completed),
        }
    }

    pub fn current(&self) -> Option<InstallationStep> {
        self.current
    }

    pub fn sequence(&self) -> StepSequence {
        self.sequence
    }

    /// Move to `step` and return its `(n/total)` label.
    ///
    /// `step` must directly follow the current step.
    pub fn enter(&mut self, step: InstallationStep) -> String {
        let expected = match self.current {
            Some(current) => current.next(),
            None => self.sequence.steps().first().copied(),
        };
        debug_assert_eq!(
            expected,
            Some(step),
            "installation steps must run in order"
        );
        self.current = Some(step);
        self.sequence.label(step)
    }
}
