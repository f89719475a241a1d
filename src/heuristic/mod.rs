//! Sorting scanner series into BIDS outputs for heudiconv conversion.
//!
//! Each series from a `dicominfo.tsv` table is matched against a fixed set of
//! rules on its id, description, protocol name, image type and number of
//! volumes, and assigned to zero or more output [`Category`]s. The
//! assignment then renders the BIDS path of every converted series.

pub mod dicominfo;
pub mod template;

pub use dicominfo::{parse_dicominfo, parse_image_type, read_dicominfo};
pub use template::{render, TemplateFields};

use crate::error::{Error, Result};
use serde::Serialize;

/// A conversion target: path template, output formats, annotations.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct OutputKey {
    pub template: String,
    pub outtypes: Vec<String>,
    pub annotation_classes: Option<Vec<String>>,
}

/// Build an [`OutputKey`] writing `nii.gz`.
pub fn create_key(template: &str) -> Result<OutputKey> {
    create_key_with(template, &["nii.gz"], None)
}

/// Build an [`OutputKey`] with explicit output types and annotations.
pub fn create_key_with(
    template: &str,
    outtypes: &[&str],
    annotation_classes: Option<Vec<String>>,
) -> Result<OutputKey> {
    if template.is_empty() {
        return Err(Error::Configuration(
            "template must be a valid format string".to_string(),
        ));
    }
    Ok(OutputKey {
        template: template.to_string(),
        outtypes: outtypes.iter().map(|s| s.to_string()).collect(),
        annotation_classes,
    })
}

/// Fieldmap `IntendedFor` matching options passed to heudiconv.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IntendedForOptions {
    pub matching_parameters: &'static [&'static str],
    pub criterion: &'static str,
}

pub const INTENDED_FOR_OPTIONS: IntendedForOptions = IntendedForOptions {
    matching_parameters: &["ImagingVolume", "Shims", "ModalityAcquisitionLabel"],
    criterion: "Closest",
};

/// Output categories, in table order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    T1w,
    FieldmapSeAp,
    FieldmapSePa,
    TaskRest,
    TaskRestSbref,
    TaskBadaga,
    TaskBadagaSbref,
    TaskAlice,
    TaskAliceSbref,
    Dwi,
    DwiDistAp,
    DwiDistPa,
    MpmT1w,
    MpmPd,
    MpmMt,
    MpmB1,
    MpmFmapMag,
    MpmFmapPhase,
}

impl Category {
    pub const ALL: [Category; 18] = [
        Category::T1w,
        Category::FieldmapSeAp,
        Category::FieldmapSePa,
        Category::TaskRest,
        Category::TaskRestSbref,
        Category::TaskBadaga,
        Category::TaskBadagaSbref,
        Category::TaskAlice,
        Category::TaskAliceSbref,
        Category::Dwi,
        Category::DwiDistAp,
        Category::DwiDistPa,
        Category::MpmT1w,
        Category::MpmPd,
        Category::MpmMt,
        Category::MpmB1,
        Category::MpmFmapMag,
        Category::MpmFmapPhase,
    ];

    /// BIDS path template (without extension).
    pub fn template(self) -> &'static str {
        match self {
            Category::T1w => "sub-{subject}/anat/sub-{subject}_T1w",
            Category::FieldmapSeAp => {
                "sub-{subject}/fmap/sub-{subject}_acq-func_dir-AP_run-{item:02d}_epi"
            }
            Category::FieldmapSePa => {
                "sub-{subject}/fmap/sub-{subject}_acq-func_dir-PA_run-{item:02d}_epi"
            }
            Category::TaskRest => "sub-{subject}/func/sub-{subject}_task-rest_run-{item:02d}_bold",
            Category::TaskRestSbref => {
                "sub-{subject}/func/sub-{subject}_task-rest_run-{item:02d}_sbref"
            }
            Category::TaskBadaga => {
                "sub-{subject}/func/sub-{subject}_task-badaga_run-{item:02d}_bold"
            }
            Category::TaskBadagaSbref => {
                "sub-{subject}/func/sub-{subject}_task-badaga_run-{item:02d}_sbref"
            }
            Category::TaskAlice => {
                "sub-{subject}/func/sub-{subject}_task-alice_run-{item:02d}_bold"
            }
            Category::TaskAliceSbref => {
                "sub-{subject}/func/sub-{subject}_task-alice_run-{item:02d}_sbref"
            }
            Category::Dwi => "sub-{subject}/dwi/sub-{subject}_dwi",
            Category::DwiDistAp => {
                "sub-{subject}/fmap/sub-{subject}_acq-dwi_dir-AP_run-{item:02d}_ge"
            }
            Category::DwiDistPa => {
                "sub-{subject}/fmap/sub-{subject}_acq-dwi_dir-PA_run-{item:02d}_ge"
            }
            Category::MpmT1w => "sub-{subject}/anat/sub-{subject}_acq-t1w_echo-{item:01d}_MPM",
            Category::MpmPd => "sub-{subject}/anat/sub-{subject}_acq-pd_echo-{item:01d}_MPM",
            Category::MpmMt => {
                "sub-{subject}/anat/sub-{subject}_acq-MTw_echo-{item:01d}_mt-on_MPM"
            }
            Category::MpmB1 => "sub-{subject}/fmap/sub-{subject}_acq-b1_echo-{item:01d}_MPM",
            Category::MpmFmapMag => {
                "sub-{subject}/fmap/sub-{subject}_desc-fmap_echo-{item:01d}_part-mag_gre_MPM"
            }
            Category::MpmFmapPhase => {
                "sub-{subject}/fmap/sub-{subject}_desc-fmap_echo-{item:01d}_MPM"
            }
        }
    }

    /// The category's key, converted to `nii.gz`.
    pub fn output_key(self) -> Result<OutputKey> {
        create_key(self.template())
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// One scanner series as listed by heudiconv.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeriesInfo {
    pub series_id: String,
    pub series_description: String,
    pub protocol_name: String,
    pub image_type: Vec<String>,
    /// Number of volumes.
    pub dim4: i64,
}

impl SeriesInfo {
    /// Exact element match on the image type.
    fn has_image_type(&self, value: &str) -> bool {
        self.image_type.iter().any(|t| t == value)
    }

    fn description_has(&self, needle: &str) -> bool {
        self.series_description.contains(needle)
    }

    /// Functional and diffusion runs are kept only when complete.
    fn is_full_run(&self) -> bool {
        self.dim4 > 100
    }
}

/// A series placed in a category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Assigned {
    pub series_id: String,
    /// 1-based position of the series in the input list.
    pub seqitem: usize,
}

/// Series per category, for every category in table order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesAssignment {
    slots: Vec<Vec<Assigned>>,
}

impl Default for SeriesAssignment {
    fn default() -> Self {
        Self {
            slots: vec![Vec::new(); Category::ALL.len()],
        }
    }
}

impl SeriesAssignment {
    fn push(&mut self, category: Category, series: &SeriesInfo, seqitem: usize) {
        self.slots[category.index()].push(Assigned {
            series_id: series.series_id.clone(),
            seqitem,
        });
    }

    fn replace(&mut self, category: Category, series: &SeriesInfo, seqitem: usize) {
        self.slots[category.index()].clear();
        self.push(category, series, seqitem);
    }

    pub fn get(&self, category: Category) -> &[Assigned] {
        &self.slots[category.index()]
    }

    /// Series ids assigned to `category`, in assignment order.
    pub fn series_ids(&self, category: Category) -> Vec<&str> {
        self.get(category)
            .iter()
            .map(|a| a.series_id.as_str())
            .collect()
    }

    /// Every category with its series, empty ones included.
    pub fn iter(&self) -> impl Iterator<Item = (Category, &[Assigned])> {
        Category::ALL
            .iter()
            .zip(&self.slots)
            .map(|(&c, s)| (c, s.as_slice()))
    }

    /// Total number of assignments.
    pub fn len(&self) -> usize {
        self.slots.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Output path (without extension) of every assigned series.
    pub fn render(&self, subject: &str) -> Result<Vec<RenderedSeries>> {
        let mut rendered = Vec::with_capacity(self.len());
        for (category, assigned) in self.iter() {
            for (i, series) in assigned.iter().enumerate() {
                let fields = TemplateFields {
                    subject,
                    item: i + 1,
                    seqitem: series.seqitem,
                    subindex: 1,
                };
                rendered.push(RenderedSeries {
                    category,
                    series_id: series.series_id.clone(),
                    path: render(category.template(), &fields)?,
                });
            }
        }
        Ok(rendered)
    }
}

/// Output path of one series.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderedSeries {
    pub category: Category,
    pub series_id: String,
    pub path: String,
}

/// Assign each series to its output categories.
///
/// Rules are evaluated independently for every series; a series can land in
/// several categories. Only the T1w category keeps a single series (the
/// last match).
pub fn classify(series: &[SeriesInfo]) -> SeriesAssignment {
    let mut info = SeriesAssignment::default();

    for (i, s) in series.iter().enumerate() {
        let seqitem = i + 1;

        if s.series_id.contains("T1w") && s.has_image_type("NORM") {
            info.replace(Category::T1w, s, seqitem);
        }

        if s.description_has("SpinEchoFieldMap") {
            if s.description_has("AP") {
                info.push(Category::FieldmapSeAp, s, seqitem);
            } else if s.description_has("PA") {
                info.push(Category::FieldmapSePa, s, seqitem);
            }
        }

        for (task, run, sbref) in [
            ("REST", Category::TaskRest, Category::TaskRestSbref),
            ("BADAGA", Category::TaskBadaga, Category::TaskBadagaSbref),
            ("ALICE", Category::TaskAlice, Category::TaskAliceSbref),
        ] {
            if s.description_has(task) {
                if s.description_has("SBRef") {
                    info.push(sbref, s, seqitem);
                } else if s.is_full_run() {
                    info.push(run, s, seqitem);
                }
            }
        }

        if s.protocol_name.contains("dMRI") {
            if s.description_has("DistortionMap_AP") {
                info.push(Category::DwiDistAp, s, seqitem);
            }
            // An AP distortion map is still checked for PA / full run below.
            if s.description_has("DistortionMap_PA") {
                info.push(Category::DwiDistPa, s, seqitem);
            } else if s.is_full_run() {
                info.push(Category::Dwi, s, seqitem);
            }
        }

        if s.protocol_name.contains("mfc_seste_b1map") {
            info.push(Category::MpmB1, s, seqitem);
        }

        if s.description_has("gre_field_mapping") {
            if s.has_image_type("M") {
                info.push(Category::MpmFmapMag, s, seqitem);
            } else if s.has_image_type("P") {
                info.push(Category::MpmFmapPhase, s, seqitem);
            }
        }

        if s.has_image_type("NORM") {
            if s.description_has("3dflash_t1W") {
                info.push(Category::MpmT1w, s, seqitem);
            }
            if s.description_has("3dflash_MT") {
                info.push(Category::MpmMt, s, seqitem);
            }
            if s.description_has("3dflash_PD") {
                info.push(Category::MpmPd, s, seqitem);
            }
        }
    }

    info
}
