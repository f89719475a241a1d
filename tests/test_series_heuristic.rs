//! Classification of a realistic session listing into BIDS paths.

use normstar::heuristic::{self, Category};
use std::io::Write;
use tempfile::NamedTempFile;

const HEADER: &str = "total_files_till_now\texample_dcm_file\tseries_id\tdcm_dir_name\tseries_files\tunspecified\tdim1\tdim2\tdim3\tdim4\tTR\tTE\tprotocol_name\tis_motion_corrected\tis_derived\tpatient_id\tstudy_description\treferring_physician_name\tseries_description\tsequence_name\timage_type";

fn row(id: &str, dim4: u32, protocol: &str, description: &str, image_type: &str) -> String {
    format!(
        "0\tMR.dcm\t{id}\t{id}\t1\t-\t104\t104\t72\t{dim4}\t0.8\t37\t{protocol}\tFalse\tFalse\tSSP002\tstudy\t\t{description}\tepfid2d1\t{image_type}"
    )
}

fn session() -> NamedTempFile {
    let rows = [
        row("1-localizer", 1, "localizer", "localizer", "('ORIGINAL', 'PRIMARY', 'M', 'ND')"),
        row("2-T1w_MPR", 1, "T1w_MPR", "T1w_MPR", "('ORIGINAL', 'PRIMARY', 'M', 'ND')"),
        row("3-T1w_MPR", 1, "T1w_MPR", "T1w_MPR", "('ORIGINAL', 'PRIMARY', 'M', 'ND', 'NORM')"),
        row("4-SpinEchoFieldMap_AP", 3, "SpinEchoFieldMap_AP", "SpinEchoFieldMap_AP", "('ORIGINAL', 'PRIMARY', 'M', 'ND')"),
        row("5-SpinEchoFieldMap_PA", 3, "SpinEchoFieldMap_PA", "SpinEchoFieldMap_PA", "('ORIGINAL', 'PRIMARY', 'M', 'ND')"),
        row("6-fMRI_REST_SBRef", 1, "fMRI_REST", "fMRI_REST_SBRef", "('ORIGINAL', 'PRIMARY', 'M', 'ND')"),
        row("7-fMRI_REST", 420, "fMRI_REST", "fMRI_REST", "('ORIGINAL', 'PRIMARY', 'M', 'MB', 'ND', 'MOSAIC')"),
        row("8-fMRI_ALICE_SBRef", 1, "fMRI_ALICE", "fMRI_ALICE_SBRef", "('ORIGINAL', 'PRIMARY', 'M', 'ND')"),
        row("9-fMRI_ALICE", 372, "fMRI_ALICE", "fMRI_ALICE", "('ORIGINAL', 'PRIMARY', 'M', 'MB', 'ND', 'MOSAIC')"),
        row("10-fMRI_ALICE_SBRef", 1, "fMRI_ALICE", "fMRI_ALICE_SBRef", "('ORIGINAL', 'PRIMARY', 'M', 'ND')"),
        row("11-fMRI_ALICE", 372, "fMRI_ALICE", "fMRI_ALICE", "('ORIGINAL', 'PRIMARY', 'M', 'MB', 'ND', 'MOSAIC')"),
        row("12-fMRI_ALICE", 12, "fMRI_ALICE", "fMRI_ALICE", "('ORIGINAL', 'PRIMARY', 'M', 'MB', 'ND', 'MOSAIC')"),
        row("13-dMRI_DistortionMap_AP", 1, "dMRI_DistortionMap_AP", "dMRI_DistortionMap_AP", "('ORIGINAL', 'PRIMARY', 'M', 'ND')"),
        row("14-dMRI_DistortionMap_PA", 1, "dMRI_DistortionMap_PA", "dMRI_DistortionMap_PA", "('ORIGINAL', 'PRIMARY', 'M', 'ND')"),
        row("15-dMRI_dir98_AP", 99, "dMRI_dir98_AP", "dMRI_dir98_AP", "('ORIGINAL', 'PRIMARY', 'DIFFUSION', 'NONE', 'ND')"),
        row("16-dMRI_dir99_AP", 200, "dMRI_dir99_AP", "dMRI_dir99_AP", "('ORIGINAL', 'PRIMARY', 'DIFFUSION', 'NONE', 'ND')"),
        row("17-mfc_seste_b1map", 22, "mfc_seste_b1map_v1e", "mfc_seste_b1map_v1e", "('ORIGINAL', 'PRIMARY', 'M', 'ND')"),
        row("18-gre_field_mapping", 1, "gre_field_mapping", "gre_field_mapping", "('ORIGINAL', 'PRIMARY', 'M', 'ND')"),
        row("19-gre_field_mapping", 1, "gre_field_mapping", "gre_field_mapping", "('ORIGINAL', 'PRIMARY', 'P', 'ND')"),
        row("20-mt_3dflash_MT", 6, "mt_3dflash_MT", "mt_3dflash_MT", "('ORIGINAL', 'PRIMARY', 'M', 'ND', 'NORM')"),
        row("21-pd_3dflash_PD", 8, "pd_3dflash_PD", "pd_3dflash_PD", "('ORIGINAL', 'PRIMARY', 'M', 'ND', 'NORM')"),
        row("22-t1_3dflash_t1W", 8, "t1_3dflash_t1W", "t1_3dflash_t1W", "('ORIGINAL', 'PRIMARY', 'M', 'ND', 'NORM')"),
    ];

    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "{HEADER}").unwrap();
    for r in rows {
        writeln!(file, "{r}").unwrap();
    }
    file
}

#[test]
fn test_session_classification() {
    let file = session();
    let series = heuristic::read_dicominfo(file.path()).unwrap();
    assert_eq!(series.len(), 22);

    let info = heuristic::classify(&series);
    assert_eq!(info.series_ids(Category::T1w), vec!["3-T1w_MPR"]);
    assert_eq!(info.series_ids(Category::FieldmapSeAp), vec!["4-SpinEchoFieldMap_AP"]);
    assert_eq!(info.series_ids(Category::FieldmapSePa), vec!["5-SpinEchoFieldMap_PA"]);
    assert_eq!(info.series_ids(Category::TaskRestSbref), vec!["6-fMRI_REST_SBRef"]);
    assert_eq!(info.series_ids(Category::TaskRest), vec!["7-fMRI_REST"]);
    assert_eq!(
        info.series_ids(Category::TaskAliceSbref),
        vec!["8-fMRI_ALICE_SBRef", "10-fMRI_ALICE_SBRef"]
    );
    assert_eq!(
        info.series_ids(Category::TaskAlice),
        vec!["9-fMRI_ALICE", "11-fMRI_ALICE"]
    );
    assert!(info.get(Category::TaskBadaga).is_empty());
    assert_eq!(info.series_ids(Category::DwiDistAp), vec!["13-dMRI_DistortionMap_AP"]);
    assert_eq!(info.series_ids(Category::DwiDistPa), vec!["14-dMRI_DistortionMap_PA"]);
    assert_eq!(info.series_ids(Category::Dwi), vec!["16-dMRI_dir99_AP"]);
    assert_eq!(info.series_ids(Category::MpmB1), vec!["17-mfc_seste_b1map"]);
    assert_eq!(info.series_ids(Category::MpmFmapMag), vec!["18-gre_field_mapping"]);
    assert_eq!(info.series_ids(Category::MpmFmapPhase), vec!["19-gre_field_mapping"]);
    assert_eq!(info.series_ids(Category::MpmMt), vec!["20-mt_3dflash_MT"]);
    assert_eq!(info.series_ids(Category::MpmPd), vec!["21-pd_3dflash_PD"]);
    assert_eq!(info.series_ids(Category::MpmT1w), vec!["22-t1_3dflash_t1W"]);
}

#[test]
fn test_session_paths() {
    let file = session();
    let series = heuristic::read_dicominfo(file.path()).unwrap();
    let rendered = heuristic::classify(&series).render("SSP002").unwrap();

    let path_of = |id: &str| {
        rendered
            .iter()
            .find(|r| r.series_id == id)
            .map(|r| r.path.clone())
            .unwrap()
    };
    assert_eq!(path_of("3-T1w_MPR"), "sub-SSP002/anat/sub-SSP002_T1w");
    assert_eq!(
        path_of("11-fMRI_ALICE"),
        "sub-SSP002/func/sub-SSP002_task-alice_run-02_bold"
    );
    assert_eq!(
        path_of("14-dMRI_DistortionMap_PA"),
        "sub-SSP002/fmap/sub-SSP002_acq-dwi_dir-PA_run-01_ge"
    );
    assert_eq!(
        path_of("21-pd_3dflash_PD"),
        "sub-SSP002/anat/sub-SSP002_acq-pd_echo-1_MPM"
    );

    // Categories come out in table order.
    let first = rendered.first().unwrap();
    assert_eq!(first.category, Category::T1w);
    assert_eq!(rendered.len(), 18);
}
