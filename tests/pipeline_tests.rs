// End-to-end: yearly files -> combined CSV -> every stage output on disk

use reappointment_trends::{loader, Pipeline, PipelineConfig, PipelineReport, TrendDirection};
use std::fs;
use std::path::Path;

fn create_test_yearly_files(dir: &Path) {
    fs::write(
        dir.join("appointments_2015.csv"),
        "name,position,org,reappointed\n\
         J. Smith,Board Member,Dept X,No\n\
         A Lee,Chair,Dept Y,no\n\
         B Chan,Member,Dept Y,no\n",
    )
    .unwrap();
    fs::write(
        dir.join("appointments_2016.csv"),
        "Name,Position,Organization,Reappointed\n\
         A Lee,Chair,Dept Y,\n\
         C Diaz,Member,Dept Y,no\n\
         D Ng,Member,Dept Y,no\n",
    )
    .unwrap();
    fs::write(
        dir.join("appointments_2017.csv"),
        "name,position,org,reappointed\n\
         j smith,board member,DEPT X,\n\
         A Lee,Chair,Dept Y,\n\
         C Diaz,Member,Dept Y,yes\n",
    )
    .unwrap();
}

fn read_csv(path: &Path) -> Vec<csv::StringRecord> {
    let mut reader = csv::Reader::from_path(path).unwrap();
    reader.records().map(|r| r.unwrap()).collect()
}

#[test]
fn test_full_run_from_yearly_files() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    create_test_yearly_files(input.path());

    let config = PipelineConfig::default();
    let combined_path = output.path().join("combined.csv");
    let rows = loader::combine_yearly_files(input.path(), &config).unwrap();
    loader::write_combined(&combined_path, &rows).unwrap();
    assert_eq!(rows.len(), 9);

    let raws = loader::read_combined(&combined_path, &config).unwrap();
    let pipeline = Pipeline::new(config).unwrap();
    let run = pipeline.run(&raws).unwrap();
    pipeline.write_outputs(&run, output.path()).unwrap();

    // Stage 3: the 2017 Smith row is a reappointment; the 2015 row is not
    let marked = read_csv(&output.path().join("step3_marked.csv"));
    assert_eq!(marked.len(), 9);
    assert_eq!(&marked[0][0], "false");
    assert_eq!(&marked[6][0], "true");
    assert_eq!(&marked[6][5], "marked");

    // Stage 6: Dept X is keyed by normalized name, shown as first seen
    let rates = read_csv(&output.path().join("step6_rates.csv"));
    let dept_x: Vec<_> = rates.iter().filter(|r| &r[0] == "Dept X").collect();
    assert_eq!(dept_x.len(), 3);
    assert_eq!(&dept_x[0][1], "2015");
    assert_eq!(&dept_x[0][3], "0");
    assert_eq!(&dept_x[2][1], "2017");
    assert_eq!(&dept_x[2][2], "1");
    assert_eq!(&dept_x[2][3], "1");
    assert!(rates.iter().all(|r| &r[0] != "DEPT X"));

    // Stage 8: 0/3, 1/3 (A Lee), 3/3
    let annual = &run.annual;
    assert_eq!(annual.len(), 3);
    assert_eq!(annual[0].total_reappointments, 0);
    assert_eq!(annual[1].total_reappointments, 1);
    assert_eq!(annual[2].total_reappointments, 3);

    let report: PipelineReport = serde_json::from_str(
        &fs::read_to_string(output.path().join("step9_trend_report.json")).unwrap(),
    )
    .unwrap();
    let trend = report.trend.as_ref().expect("three years support a regression");
    assert_eq!(trend.direction, TrendDirection::Increasing);
    assert!(trend.slope > 0.0);
    assert_eq!(report.marking.records_in, 9);
    assert!(!report.has_integrity_warnings());
}

#[test]
fn test_missing_column_reported_before_any_stage() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("combined.csv");
    fs::write(&path, "name,position,org\nA,B,C\n").unwrap();

    let err = loader::read_combined(&path, &PipelineConfig::default()).unwrap_err();

    assert!(err.to_string().contains("reappointed"));
}
