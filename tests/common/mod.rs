#![allow(dead_code)]

use std::str::FromStr;
use std::sync::Arc;

use assessment_engine::{
    database::memory::MemoryStore,
    middleware::auth::Claims,
    models::assessment::{
        AccessPolicy, Assessment, AssessmentConfig, AssessmentQuestion, AssessmentStatistics,
        AssessmentStatus, GradeBand, NegativeMarking, ResultVisibility, Schedule,
    },
    models::question::Question,
    router,
    utils::time::ManualClock,
    AppState,
};
use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use chrono::{DateTime, Duration, TimeZone, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use tower::ServiceExt;
use uuid::Uuid;

pub const SECRET: &str = "test_secret_key";

pub struct TestApp {
    pub router: Router,
    pub store: Arc<MemoryStore>,
    pub clock: ManualClock,
}

pub fn window_start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 5, 4, 8, 0, 0).unwrap()
}

impl TestApp {
    pub fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let clock = ManualClock::new(window_start() + Duration::minutes(5));
        let state = AppState::new(store.clone(), Arc::new(clock.clone()), SECRET);
        Self {
            router: router(state),
            store,
            clock,
        }
    }

    pub async fn seed(&self, questions: &[Question], tweak: impl FnOnce(&mut Assessment)) -> Assessment {
        for question in questions {
            self.store.insert_question(question.clone()).await;
        }
        let mut assessment = assessment(questions);
        tweak(&mut assessment);
        self.store.put_assessment(assessment.clone()).await;
        assessment
    }

    pub async fn send(
        &self,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<JsonValue>,
    ) -> (StatusCode, JsonValue) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {}", token));
        }
        let request = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = if bytes.is_empty() {
            JsonValue::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }
}

pub fn token(user_id: Uuid, role: &str) -> String {
    let claims = Claims {
        sub: user_id.to_string(),
        exp: (Utc::now() + Duration::hours(1)).timestamp() as usize,
        role: Some(role.to_string()),
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .unwrap()
}

/// Decimals travel as JSON strings.
pub fn dec(value: &JsonValue) -> Decimal {
    match value {
        JsonValue::String(s) => Decimal::from_str(s).unwrap(),
        JsonValue::Number(n) => Decimal::from_str(&n.to_string()).unwrap(),
        other => panic!("not a decimal: {other}"),
    }
}

pub fn mcq(marks: i64) -> Question {
    Question::new_single_choice(
        "Which keyword moves a value into a closure?",
        &[("a", "move"), ("b", "ref"), ("c", "static")],
        "a",
        Decimal::from(marks),
    )
    .with_explanation("`move` closures take ownership of captures")
}

pub fn assessment(questions: &[Question]) -> Assessment {
    let start = window_start();
    let total: Decimal = questions.iter().map(|q| q.marks).sum();
    Assessment {
        id: Uuid::new_v4(),
        title: "Rust fundamentals".into(),
        description: None,
        status: AssessmentStatus::Published,
        questions: questions
            .iter()
            .enumerate()
            .map(|(i, q)| AssessmentQuestion {
                question_id: q.id,
                marks: q.marks,
                order: i as i32 + 1,
                optional: false,
                time_limit_seconds: None,
            })
            .collect(),
        config: AssessmentConfig {
            duration_minutes: 10,
            shuffle_questions: false,
            shuffle_options: false,
            max_attempts: 2,
            attempt_delay_minutes: 0,
            negative_marking: NegativeMarking::default(),
            partial_marking: true,
            result_visibility: ResultVisibility::Immediate,
        },
        schedule: Schedule {
            start,
            end: start + Duration::hours(4),
            grace_period_minutes: 0,
            late_submission: Default::default(),
        },
        grading_scale: vec![
            GradeBand::new(90, 100, "A+"),
            GradeBand::new(80, 89, "A"),
            GradeBand::new(70, 79, "B"),
            GradeBand::new(60, 69, "C"),
            GradeBand::new(50, 59, "D"),
            GradeBand::new(0, 49, "F"),
        ],
        total_marks: total,
        passing_marks: total / Decimal::TWO,
        access: AccessPolicy::Open,
        participants: Vec::new(),
        results_released: false,
        statistics: AssessmentStatistics::default(),
        created_by: Uuid::new_v4(),
        created_at: start,
        updated_at: start,
    }
}
