//! Integration tests for RfmForge

use std::collections::HashMap;
use std::io::Write;
use std::path::Path;

use rfmforge::pipeline::{
    CLEAN_TRANSACTIONS_FILE, MODEL_FILE, MODEL_REPORT_JSON, MODEL_REPORT_MD, QUALITY_REPORT_JSON,
    QUALITY_REPORT_MD, RFM_FILE, SCORED_FILE,
};
use rfmforge::{
    load_rfm_table, run_pipeline, BuilderConfig, CleaningRule, Error, PipelineInput, PipelineOptions,
    SegmentationModel, SegmenterConfig,
};
use tempfile::{tempdir, NamedTempFile};

const HEADER: &str = "InvoiceNo,StockCode,Description,Quantity,InvoiceDate,UnitPrice,CustomerID,Country";

/// Create a transaction CSV with three clearly separated customer groups and a few dirty rows
fn create_test_csv() -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "{}", HEADER).unwrap();

    // Recent, frequent, high value: four invoices each in December 2011
    for (c, customer) in [12346, 12347, 12348, 12349].iter().enumerate() {
        for day in 0..4 {
            writeln!(
                file,
                "58{}{},22423,REGENCY CAKESTAND 3 TIER,{},2011-12-0{} 12:00:00,12.75,{},United Kingdom",
                c,
                day,
                20 + c,
                5 + day,
                customer
            )
            .unwrap();
        }
    }

    // Mid-range: two invoices each in September 2011
    for (c, customer) in [13001, 13002, 13003, 13004].iter().enumerate() {
        for day in 0..2 {
            writeln!(
                file,
                "56{}{},85123A,WHITE HANGING HEART T-LIGHT HOLDER,{},2011-09-1{} 10:30:00,2.95,{},France",
                c,
                day,
                12 + c,
                day,
                customer
            )
            .unwrap();
        }
    }

    // Lapsed: a single small invoice each in January 2011
    for (c, customer) in [14001, 14002, 14003, 14004].iter().enumerate() {
        writeln!(
            file,
            "5400{},84406B,CREAM CUPID HEARTS COAT HANGER,1,2011-01-0{} 09:00:00,3.25,{},Germany",
            c,
            c + 3,
            customer
        )
        .unwrap();
    }

    // Dirty rows
    writeln!(file, "581000,22752,SET 7 BABUSHKA NESTING BOXES,2,2011-12-01 10:15:00,7.65,,United Kingdom").unwrap();
    writeln!(file, "C581001,22752,SET 7 BABUSHKA NESTING BOXES,-2,2011-12-02 10:15:00,7.65,12346,United Kingdom").unwrap();
    writeln!(file, "581002,POST,POSTAGE,1,2011-12-02 11:00:00,0,12347,United Kingdom").unwrap();
    writeln!(file, "C581003,M,Manual,1,2011-12-03 11:00:00,4.5,12348,United Kingdom").unwrap();

    file
}

fn options(input: PipelineInput, outdir: &Path) -> PipelineOptions {
    PipelineOptions {
        input,
        outdir: outdir.to_path_buf(),
        builder: BuilderConfig::default(),
        segmenter: SegmenterConfig::default(),
        plots: false,
    }
}

fn segments_by_customer(path: &Path) -> HashMap<String, String> {
    let content = std::fs::read_to_string(path).unwrap();
    let mut lines = content.lines();
    let header: Vec<&str> = lines.next().unwrap().split(',').collect();
    let id_idx = header.iter().position(|h| *h == "customer_id").unwrap();
    let segment_idx = header.iter().position(|h| *h == "segment_name").unwrap();

    lines
        .map(|line| {
            let fields: Vec<&str> = line.split(',').collect();
            (fields[id_idx].to_string(), fields[segment_idx].to_string())
        })
        .collect()
}

#[test]
fn test_end_to_end_pipeline() {
    let test_file = create_test_csv();
    let outdir = tempdir().unwrap();

    let outcome = run_pipeline(&options(
        PipelineInput::Transactions(test_file.path().to_path_buf()),
        outdir.path(),
    ))
    .unwrap();

    // Verify cleaning
    let quality = outcome.quality.as_ref().unwrap();
    assert_eq!(quality.raw_rows, 32);
    assert_eq!(quality.cleaned_rows, 28);
    assert_eq!(quality.customers, 12);
    assert_eq!(quality.removed_by(CleaningRule::MissingCustomerId), 1);
    assert_eq!(quality.removed_by(CleaningRule::NonPositiveQuantity), 1);
    assert_eq!(quality.removed_by(CleaningRule::NonPositiveUnitPrice), 1);
    assert_eq!(quality.removed_by(CleaningRule::CancelledInvoice), 1);
    assert_eq!(quality.cancellation_rows, 2);

    let snapshot = outcome.snapshot_date.unwrap();
    assert_eq!(snapshot.to_string(), "2011-12-09 12:00:00");

    // Verify every artifact was written
    for file in [
        CLEAN_TRANSACTIONS_FILE,
        RFM_FILE,
        SCORED_FILE,
        QUALITY_REPORT_MD,
        QUALITY_REPORT_JSON,
        MODEL_REPORT_MD,
        MODEL_REPORT_JSON,
        MODEL_FILE,
    ] {
        let path = outdir.path().join(file);
        assert!(path.exists(), "{} was not written", file);
        assert!(outcome.written.contains(&path));
    }

    // Verify the RFM table
    let rfm = load_rfm_table(outdir.path().join(RFM_FILE)).unwrap();
    assert_eq!(rfm.len(), 12);
    let best = rfm.iter().find(|r| r.customer_id == "12346").unwrap();
    assert_eq!(best.recency, 1);
    assert_eq!(best.frequency, 4);
    assert!((best.monetary - 4.0 * 20.0 * 12.75).abs() < 1e-9);
    assert_eq!(best.country, "United Kingdom");

    // Verify the segmentation
    let report = &outcome.segmentation.report;
    assert_eq!(report.customers, 12);
    assert_eq!(report.clusters.iter().map(|c| c.size).sum::<usize>(), 12);
    assert!(report.k >= 2 && report.k <= 10);

    let segments = segments_by_customer(&outdir.path().join(SCORED_FILE));
    assert_eq!(segments.len(), 12);
    assert_eq!(segments["12349"], "Champions");
    assert_eq!(segments["14001"], "Hibernating");
}

#[test]
fn test_quality_report_json() {
    let test_file = create_test_csv();
    let outdir = tempdir().unwrap();
    run_pipeline(&options(
        PipelineInput::Transactions(test_file.path().to_path_buf()),
        outdir.path(),
    ))
    .unwrap();

    let json = std::fs::read_to_string(outdir.path().join(QUALITY_REPORT_JSON)).unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(value["raw_rows"], 32);
    assert_eq!(value["cleaned_rows"], 28);
    assert_eq!(value["removed_by_rule"].as_array().unwrap().len(), 5);
    assert_eq!(value["removed_by_rule"][0]["rule"], "missing_customer_id");
}

#[test]
fn test_pipeline_is_deterministic() {
    let test_file = create_test_csv();
    let first = tempdir().unwrap();
    let second = tempdir().unwrap();

    for outdir in [first.path(), second.path()] {
        run_pipeline(&options(
            PipelineInput::Transactions(test_file.path().to_path_buf()),
            outdir,
        ))
        .unwrap();
    }

    let read = |dir: &Path| std::fs::read_to_string(dir.join(SCORED_FILE)).unwrap();
    assert_eq!(read(first.path()), read(second.path()));
}

#[test]
fn test_segmenting_a_saved_rfm_table() {
    let test_file = create_test_csv();
    let first = tempdir().unwrap();
    let second = tempdir().unwrap();

    run_pipeline(&options(
        PipelineInput::Transactions(test_file.path().to_path_buf()),
        first.path(),
    ))
    .unwrap();

    let outcome = run_pipeline(&options(
        PipelineInput::Rfm(first.path().join(RFM_FILE)),
        second.path(),
    ))
    .unwrap();

    // The feature builder is skipped entirely
    assert!(outcome.quality.is_none());
    assert!(outcome.snapshot_date.is_none());
    assert!(!second.path().join(CLEAN_TRANSACTIONS_FILE).exists());
    assert!(!second.path().join(QUALITY_REPORT_MD).exists());

    assert_eq!(
        segments_by_customer(&first.path().join(SCORED_FILE)),
        segments_by_customer(&second.path().join(SCORED_FILE))
    );
}

#[test]
fn test_prediction_with_saved_model() {
    let test_file = create_test_csv();
    let outdir = tempdir().unwrap();
    let outcome = run_pipeline(&options(
        PipelineInput::Transactions(test_file.path().to_path_buf()),
        outdir.path(),
    ))
    .unwrap();

    let model = SegmentationModel::load(outdir.path().join(MODEL_FILE)).unwrap();
    assert_eq!(model.centroids.len(), outcome.segmentation.report.k);

    // Same features as customer 12349
    let assignment = model.assign(1.0, 4.0, 1173.0).unwrap();
    assert_eq!(assignment.segment_name, "Champions");

    // Same features as customer 14001
    let assignment = model.assign(340.0, 1.0, 3.25).unwrap();
    assert_eq!(assignment.segment_name, "Hibernating");
    assert!(assignment.cluster_id < outcome.segmentation.report.k);
}

#[test]
fn test_error_handling_single_customer() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "{}", HEADER).unwrap();
    writeln!(file, "536365,71053,WHITE METAL LANTERN,6,2010-12-01 08:26:00,3.39,17850,United Kingdom").unwrap();
    writeln!(file, "536366,22633,HAND WARMER UNION JACK,6,2010-12-02 08:28:00,1.85,17850,United Kingdom").unwrap();

    let outdir = tempdir().unwrap();
    let err = run_pipeline(&options(
        PipelineInput::Transactions(file.path().to_path_buf()),
        outdir.path(),
    ))
    .unwrap_err();

    assert!(matches!(err, Error::InsufficientCustomers { customers: 1, .. }));
    assert!(err.is_data_sufficiency());
}

#[test]
fn test_error_handling_nothing_survives_cleaning() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "{}", HEADER).unwrap();
    writeln!(file, "C536379,D,Discount,-1,2010-12-01 09:41:00,27.5,14527,United Kingdom").unwrap();
    writeln!(file, "536380,22441,GROW YOUR OWN BASIL,4,2010-12-01 09:45:00,1.25,,United Kingdom").unwrap();

    let outdir = tempdir().unwrap();
    let err = run_pipeline(&options(
        PipelineInput::Transactions(file.path().to_path_buf()),
        outdir.path(),
    ))
    .unwrap_err();

    assert!(matches!(err, Error::EmptyDataset { raw_rows: 2 }));
}

#[test]
fn test_error_handling_missing_columns() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "InvoiceNo,Quantity,UnitPrice").unwrap();
    writeln!(file, "536365,6,2.55").unwrap();

    let outdir = tempdir().unwrap();
    let err = run_pipeline(&options(
        PipelineInput::Transactions(file.path().to_path_buf()),
        outdir.path(),
    ))
    .unwrap_err();

    match err {
        Error::MissingColumns { missing, .. } => {
            assert!(missing.contains(&"CustomerID".to_string()));
            assert!(missing.contains(&"InvoiceDate".to_string()));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_failed_run_leaves_previous_outputs_untouched() {
    let test_file = create_test_csv();
    let outdir = tempdir().unwrap();
    run_pipeline(&options(
        PipelineInput::Transactions(test_file.path().to_path_buf()),
        outdir.path(),
    ))
    .unwrap();

    let read = |file: &str| std::fs::read_to_string(outdir.path().join(file)).unwrap();
    let rfm_before = read(RFM_FILE);
    let quality_before = read(QUALITY_REPORT_JSON);
    let scored_before = read(SCORED_FILE);

    let mut single = NamedTempFile::new().unwrap();
    writeln!(single, "{}", HEADER).unwrap();
    writeln!(single, "536365,71053,WHITE METAL LANTERN,6,2011-12-01 08:26:00,3.39,77777,United Kingdom").unwrap();

    let err = run_pipeline(&options(
        PipelineInput::Transactions(single.path().to_path_buf()),
        outdir.path(),
    ))
    .unwrap_err();
    assert!(matches!(err, Error::InsufficientCustomers { customers: 1, .. }));

    assert_eq!(read(RFM_FILE), rfm_before);
    assert_eq!(read(QUALITY_REPORT_JSON), quality_before);
    assert_eq!(read(SCORED_FILE), scored_before);
    assert!(!read(RFM_FILE).contains("77777"));
}

#[test]
fn test_failed_run_creates_no_outputs() {
    let mut single = NamedTempFile::new().unwrap();
    writeln!(single, "{}", HEADER).unwrap();
    writeln!(single, "536365,71053,WHITE METAL LANTERN,6,2011-12-01 08:26:00,3.39,77777,United Kingdom").unwrap();

    let parent = tempdir().unwrap();
    let outdir = parent.path().join("out");
    assert!(run_pipeline(&options(PipelineInput::Transactions(single.path().to_path_buf()), &outdir)).is_err());
    assert!(!outdir.exists());
}
