//! 后台工作线程与活动文件加载测试

mod ageing_test_fixtures;

use ageing_analysis_tool::model::{CampaignDescriptor, DatasetStatus};
use ageing_analysis_tool::processing::{self, CancellationToken, Stage};
use ageing_analysis_tool::tools::{load_campaign, render_json};
use ageing_analysis_tool::{AnalysisError, Pipeline};
use ageing_test_fixtures::*;
use std::fs;

#[test]
fn test_progress_events_are_finite_and_ordered() {
    let dir = tempfile::tempdir().unwrap();
    let campaign = CampaignDescriptor {
        datasets: vec![
            standard_dataset(dir.path(), date(1, 10), 100.0, Some(95.0), Some(90.0)),
            standard_dataset(dir.path(), date(2, 10), 100.0, Some(93.0), Some(88.0)),
        ],
        ..Default::default()
    };

    let handle = processing::spawn_analysis(Pipeline::new(test_config()).unwrap(), campaign).unwrap();
    let events: Vec<_> = handle.events().collect();
    let result = handle.wait().unwrap();

    assert_eq!(result.datasets.len(), 2);
    assert_eq!(events.last().map(|e| e.stage), Some(Stage::Completed));
    assert_eq!(events.iter().filter(|e| e.stage.is_terminal()).count(), 1);
    assert!(
        events.windows(2).all(|pair| pair[0].fraction <= pair[1].fraction),
        "进度比例须单调不减 / fractions must not decrease"
    );

    let parsing: Vec<_> = events
        .iter()
        .filter(|e| e.stage == Stage::Parsing)
        .filter_map(|e| e.detail.clone())
        .collect();
    assert_eq!(parsing, vec!["2024-01-10".to_string(), "2024-02-10".to_string()]);
    assert!(events.iter().any(|e| e.stage == Stage::Normalization));
    assert!(events.iter().any(|e| e.stage == Stage::Enrichment));
}

#[test]
fn test_pre_cancelled_run_reports_cancelled() {
    let dir = tempfile::tempdir().unwrap();
    let campaign = CampaignDescriptor {
        datasets: vec![standard_dataset(dir.path(), date(1, 10), 100.0, Some(95.0), None)],
        ..Default::default()
    };

    let token = CancellationToken::new();
    token.cancel();
    let handle = processing::spawn_analysis_with(
        Pipeline::new(test_config()).unwrap(),
        campaign,
        token,
    )
    .unwrap();

    let stages: Vec<Stage> = handle.events().map(|e| e.stage).collect();
    assert_eq!(stages, vec![Stage::Cancelled]);
    assert!(matches!(handle.wait(), Err(AnalysisError::Cancelled)));
}

#[test]
fn test_campaign_file_with_discovered_modules() {
    let dir = tempfile::tempdir().unwrap();
    let january = dir.path().join("data").join("jan");
    let february = dir.path().join("data").join("feb");
    write_module_file(&january, "PMA0", &[Some(100.0), Some(100.0), Some(95.0), Some(90.0)]);
    write_module_file(&february, "PMA0", &[Some(100.0), Some(100.0), Some(90.0), Some(85.0)]);

    let campaign_path = dir.path().join("campaign.json");
    fs::write(
        &campaign_path,
        r#"{
            "basePath": "data",
            "channelsPerModule": 4,
            "inputs": [
                { "date": "2024-02-10", "basePath": "feb", "refCH": { "PM": "PMA0", "CH": [1, 2] } },
                { "date": "2024-01-10", "basePath": "jan", "refCH": { "PM": "PMA0", "CH": ["CH01", "CH02"] } }
            ]
        }"#,
    )
    .unwrap();

    let campaign = load_campaign(&campaign_path).unwrap();
    assert_eq!(campaign.datasets.len(), 2);
    assert_eq!(campaign.datasets[0].modules[0].identifier, "PMA0");

    let result = Pipeline::new(test_config()).unwrap().run(&campaign).unwrap();
    // 数据集按日期排序，最早的为基准
    assert_eq!(result.baseline, Some(date(1, 10)));
    assert!(result.datasets.iter().all(|d| d.status == DatasetStatus::Complete));

    let normalized = result.datasets[1]
        .channel("PMA0", 3)
        .and_then(|r| r.normalized.gaussian.as_f64())
        .unwrap();
    assert!((normalized - 0.9474).abs() < 1e-4);

    let json = render_json(&result).unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    let channel = &value["datasets"][0]["modules"][0]["channels"][0];
    assert_eq!(channel["name"], "CH01");
    assert_eq!(channel["normalized"]["gaussian"]["status"], "AVAILABLE");
}
