//! End-to-end pipeline scenario tests.
//!
//! Drives the full pipeline the way the host scheduler would — repeated
//! collection ticks, retrain triggers on their own cadence, forecast and
//! status reads in between — and checks the cold-start, acceptance and
//! fallback behavior across component boundaries. Everything is seeded and
//! clock-injected, so these tests are deterministic and run offline.

use chrono::{DateTime, Duration, TimeZone, Utc};

use trafcast_service::config::PipelineConfig;
use trafcast_service::intersections::{Intersection, Registry};
use trafcast_service::model::{CongestionClass, CongestionLevel, PipelineError, RetrainOutcome, SlotState};
use trafcast_service::pipeline::Pipeline;

fn three_class_registry() -> Registry {
    let entry = |id: &str, class| Intersection {
        id: id.to_string(),
        name: format!("{} junction", id),
        city: "Testville".to_string(),
        class,
        latitude: 0.0,
        longitude: 0.0,
    };
    Registry::new(vec![
        entry("t_high", CongestionClass::High),
        entry("t_medium", CongestionClass::Medium),
        entry("t_low", CongestionClass::Low),
    ])
    .unwrap()
}

fn seeded_pipeline(seed: u64) -> Pipeline {
    let mut config = PipelineConfig::default();
    config.simulation.seed = Some(seed);
    Pipeline::new(three_class_registry(), config).unwrap()
}

/// Morning rush on a Wednesday: classes separate cleanly from tick one.
fn scenario_start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap()
}

fn average_count(pipeline: &Pipeline, id: &str, since: DateTime<Utc>, until: DateTime<Utc>) -> f64 {
    let readings = pipeline.history().query(id, since, until);
    assert!(!readings.is_empty(), "no readings for {}", id);
    let sum: u64 = readings.iter().map(|r| r.vehicle_count as u64).sum();
    sum as f64 / readings.len() as f64
}

#[test]
fn cold_start_to_accepted_model_scenario() {
    let pipeline = seeded_pipeline(1);
    let start = scenario_start();
    let tick_at = |i: i64| start + Duration::minutes(5 * i);

    // --- 20 ticks of collection -------------------------------------------
    for i in 0..20 {
        let readings = pipeline.on_collect_tick(tick_at(i)).unwrap();
        assert_eq!(readings.len(), 3);
    }
    assert_eq!(
        pipeline.history().len(),
        60,
        "20 ticks across 3 intersections must leave 60 readings"
    );

    let avg_high = average_count(&pipeline, "t_high", start, tick_at(20));
    let avg_medium = average_count(&pipeline, "t_medium", start, tick_at(20));
    let avg_low = average_count(&pipeline, "t_low", start, tick_at(20));
    println!(
        "class averages after 20 ticks: high={:.1} medium={:.1} low={:.1}",
        avg_high, avg_medium, avg_low
    );
    assert!(avg_high > avg_medium && avg_medium > avg_low);

    // --- cold-start retrain ------------------------------------------------
    let outcome = pipeline.on_retrain_tick(tick_at(20));
    assert_eq!(
        outcome,
        RetrainOutcome::InsufficientData,
        "20 samples per intersection are below the training floor"
    );
    assert!(pipeline.model_status().fallback);

    // --- collect up to 500 ticks, then retrain again -----------------------
    for i in 20..500 {
        pipeline.on_collect_tick(tick_at(i)).unwrap();
    }
    assert_eq!(pipeline.history().len(), 1500);

    let retrain_time = tick_at(500);
    let accuracy = match pipeline.on_retrain_tick(retrain_time) {
        RetrainOutcome::Accepted { accuracy } => accuracy,
        other => panic!("expected an accepted retrain after 500 ticks, got {:?}", other),
    };
    println!("accepted retrain with validation accuracy {:.3}", accuracy);
    assert!(accuracy >= 0.5);

    let status = pipeline.model_status();
    assert_eq!(status.state, SlotState::Active);
    assert!(!status.fallback);
    assert_eq!(status.trained_at, Some(retrain_time));
    assert_eq!(status.accuracy, Some(accuracy));

    // --- forecast one hour ahead ------------------------------------------
    let forecast = pipeline
        .forecast("t_high", retrain_time + Duration::hours(1), retrain_time)
        .unwrap();
    assert_eq!(
        forecast.model_trained_at,
        retrain_time,
        "forecast must carry the just-accepted model's trained-at"
    );
    assert!(!forecast.is_fallback());

    // --- horizon limit ------------------------------------------------------
    match pipeline.forecast("t_high", retrain_time + Duration::hours(25), retrain_time) {
        Err(PipelineError::OutOfHorizon { .. }) => {}
        other => panic!("25h ahead must be OutOfHorizon, got {:?}", other),
    }
}

#[test]
fn forecasts_always_answer_before_any_training() {
    let pipeline = seeded_pipeline(2);
    let now = scenario_start();

    // Zero history, untrained model: every in-horizon request still answers.
    for hours in [0, 1, 6, 12, 24] {
        let forecast = pipeline
            .forecast("t_medium", now + Duration::hours(hours), now)
            .unwrap_or_else(|e| panic!("fallback must answer at {}h: {}", hours, e));
        assert!(forecast.is_fallback(), "sentinel trained-at expected before training");
    }

    match pipeline.forecast("t_medium", now + Duration::hours(25), now) {
        Err(PipelineError::OutOfHorizon { requested_minutes, max_minutes }) => {
            assert_eq!(requested_minutes, 1500);
            assert_eq!(max_minutes, 1440);
        }
        other => panic!("expected OutOfHorizon, got {:?}", other),
    }
}

#[test]
fn emergency_mode_round_trip_through_the_pipeline() {
    let pipeline = seeded_pipeline(3);
    // Overnight, so cleared readings are unambiguously below Severe.
    let start = Utc.with_ymd_and_hms(2024, 5, 1, 1, 0, 0).unwrap();

    pipeline.on_collect_tick(start).unwrap();

    pipeline.set_emergency(true);
    let during = pipeline.on_collect_tick(start + Duration::minutes(5)).unwrap();
    assert!(during.iter().all(|r| r.level == CongestionLevel::Severe));
    assert!(during.iter().all(|r| r.is_emergency));

    pipeline.set_emergency(false);
    let after = pipeline.on_collect_tick(start + Duration::minutes(10)).unwrap();
    assert!(after.iter().all(|r| !r.is_emergency));
    assert!(
        after.iter().all(|r| r.level < CongestionLevel::Severe),
        "overnight readings must return to class-appropriate levels within one tick"
    );
}

#[test]
fn retrain_trigger_with_no_history_leaves_the_slot_untrained() {
    let pipeline = seeded_pipeline(4);
    let start = scenario_start();

    // No history at all: the retrain trigger is safe to fire regardless.
    assert_eq!(pipeline.on_retrain_tick(start), RetrainOutcome::InsufficientData);
    assert_eq!(pipeline.model_status().state, SlotState::Untrained);
    assert_eq!(pipeline.model_status().trained_at, None);
}
