//! The fixed, ordered stage lists of each pipeline.
//!
//! These tables are the single authority for stage order, sentinel names and
//! cleanup; nothing else in the crate spells a sentinel name by hand.
use clap::ValueEnum;
use serde::Serialize;

/// How a checkpoint's confirmation artifact must look to count as resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactFormat {
    /// Any non-blank text.
    Text,
    /// A parseable JSON document.
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    /// Run by a worker that writes the sentinel itself.
    Automated,
    /// Resolved by a human; the worker module (if any) only presents the
    /// review artifact or pre-populates suggestions.
    Interactive {
        presenter: Option<&'static str>,
        confirmation: &'static str,
        format: ArtifactFormat,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stage {
    pub name: &'static str,
    pub sentinel: &'static str,
    pub kind: StageKind,
}

impl Stage {
    /// Worker module selector; workers are addressed by stage name.
    pub fn module(&self) -> &'static str {
        self.name
    }

    pub fn is_interactive(&self) -> bool {
        matches!(self.kind, StageKind::Interactive { .. })
    }
}

pub const PROCESS_IMAGES: Stage = Stage {
    name: "process_images",
    sentinel: "process_images_finished.txt",
    kind: StageKind::Automated,
};

pub const SELECT_COORDINATES: Stage = Stage {
    name: "select_coordinates",
    sentinel: "select_coordinates_finished.txt",
    kind: StageKind::Interactive {
        presenter: Some("select_coordinates"),
        confirmation: "coordinates.json",
        format: ArtifactFormat::Json,
    },
};

pub const FITNESS_MEASUREMENTS: Stage = Stage {
    name: "fitness_measurements",
    sentinel: "fitness_measurements_finished.txt",
    kind: StageKind::Automated,
};

pub const CURATE_BAD_SPOTS: Stage = Stage {
    name: "curate_bad_spots",
    sentinel: "curate_bad_spots_finished.txt",
    kind: StageKind::Interactive {
        presenter: Some("curate_bad_spots"),
        confirmation: "bad_spots_confirmed.txt",
        format: ArtifactFormat::Text,
    },
};

pub const RELATIVE_FITNESS_AND_SUSCEPTIBILITY: Stage = Stage {
    name: "relative_fitness_and_susceptibility",
    sentinel: "relative_fitness_and_susceptibility_finished.txt",
    kind: StageKind::Automated,
};

pub const GET_PLATE_LAYOUT: Stage = Stage {
    name: "get_plate_layout",
    sentinel: "get_plate_layout_finished.txt",
    kind: StageKind::Automated,
};

const ANALYZE_IMAGES_STAGES: &[Stage] = &[
    PROCESS_IMAGES,
    SELECT_COORDINATES,
    FITNESS_MEASUREMENTS,
    CURATE_BAD_SPOTS,
    RELATIVE_FITNESS_AND_SUSCEPTIBILITY,
];

const PLATE_LAYOUT_STAGES: &[Stage] = &[GET_PLATE_LAYOUT];

/// Which stage list a workspace is driven by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Pipeline {
    /// Image processing through susceptibility measures.
    AnalyzeImages,
    /// Strains and drugs tables into a long-format plate layout.
    PlateLayout,
}

impl Pipeline {
    pub fn name(self) -> &'static str {
        match self {
            Self::AnalyzeImages => "analyze_images",
            Self::PlateLayout => "get_plate_layout",
        }
    }

    pub fn stages(self) -> &'static [Stage] {
        match self {
            Self::AnalyzeImages => ANALYZE_IMAGES_STAGES,
            Self::PlateLayout => PLATE_LAYOUT_STAGES,
        }
    }

    pub fn stage(self, name: &str) -> Option<&'static Stage> {
        self.stages().iter().find(|stage| stage.name == name)
    }

    /// Comma-separated stage names for error messages.
    pub fn stage_names(self) -> String {
        self.stages()
            .iter()
            .map(|stage| stage.name)
            .collect::<Vec<_>>()
            .join(", ")
    }
}
