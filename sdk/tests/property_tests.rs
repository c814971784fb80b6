use proptest::prelude::*;
use sdk::errors::{ClientError, ErrorExt};
use sdk::types::{ImageRecord, ProjectSnapshot, ProjectStatus, StepId};

// Hints are static strings: whatever the backend sent never leaks into them
proptest! {
    #[test]
    fn test_error_user_hint_never_echoes_input(detail in "[a-z]{12,24}", status in 100u16..600) {
        let errs = vec![
            ClientError::Config(detail.clone()),
            ClientError::Network(detail.clone()),
            ClientError::Http { status, body: detail.clone() },
            ClientError::StepRejected(detail.clone()),
            ClientError::Parse(detail.clone()),
            ClientError::ProjectNotFound(detail.clone()),
            ClientError::StaleView(detail.clone()),
        ];

        for err in errs {
            let hint = err.user_hint();
            prop_assert!(!hint.is_empty());
            prop_assert!(!hint.contains(&detail));
        }
    }
}

// Missing and null content fields both read as empty text
proptest! {
    #[test]
    fn test_snapshot_content_never_absent(
        market in proptest::option::of("[a-zA-Z #\\n]{0,40}"),
        explicit_null in any::<bool>(),
    ) {
        let mut body = serde_json::json!({
            "metadata": { "project_name": "bag", "status": "completed" },
        });
        match (&market, explicit_null) {
            (Some(text), _) => body["market_analysis"] = serde_json::json!(text),
            (None, true) => body["market_analysis"] = serde_json::Value::Null,
            (None, false) => {}
        }

        let snapshot: ProjectSnapshot = serde_json::from_value(body).expect("snapshot parses");
        prop_assert_eq!(snapshot.contents.market_analysis, market.unwrap_or_default());
        prop_assert_eq!(snapshot.contents.full_report, "");
        prop_assert_eq!(snapshot.metadata.status, ProjectStatus::Completed);
    }
}

proptest! {
    #[test]
    fn test_step_names_parse_back(index in 0usize..5) {
        let step = StepId::ALL[index];
        prop_assert_eq!(step.as_str().parse::<StepId>(), Ok(step));
        prop_assert_eq!(step.index(), index);
    }
}

#[test]
fn test_images_accept_paths_and_records() {
    let images: Vec<ImageRecord> = serde_json::from_str(
        r#"["/projects/bag/a.png", {"image_path": "b.png", "concept": "A", "prompt": "p1"}]"#,
    )
    .expect("images parse");

    assert_eq!(images[0], ImageRecord::new("/projects/bag/a.png"));
    assert_eq!(images[1].path, "b.png");
    assert_eq!(images[1].concept.as_deref(), Some("A"));
    assert_eq!(images[1].prompt.as_deref(), Some("p1"));
}
