//! In-memory platform API used by unit tests

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use crate::document::{Condition, KnativeService, ServiceState};
use crate::iam::IamPolicy;
use crate::run_client::{RunApi, RunApiError};

/// Records every call and replays a scripted rollout.
///
/// Once a create or replace has been accepted, each `get_service` pops the
/// next scripted status; the last one sticks.
#[derive(Default)]
pub struct FakeRunApi {
    pub services: Mutex<HashMap<String, KnativeService>>,
    pub calls: Mutex<Vec<String>>,
    pub rollout: Mutex<VecDeque<Result<ServiceState, RunApiError>>>,
    pub probe_error: Mutex<Option<RunApiError>>,
    pub create_error: Mutex<Option<RunApiError>>,
    pub replace_error: Mutex<Option<RunApiError>>,
    pub delete_error: Mutex<Option<RunApiError>>,
    pub policy: Mutex<IamPolicy>,
    pub submitted: Mutex<Vec<KnativeService>>,
    mutated: Mutex<bool>,
}

impl FakeRunApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_existing(self, service: KnativeService) -> Self {
        self.services
            .lock()
            .unwrap()
            .insert(service.metadata.name.clone(), service);
        self
    }

    pub fn with_rollout(self, states: Vec<Result<ServiceState, RunApiError>>) -> Self {
        *self.rollout.lock().unwrap() = states.into();
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|call| call.starts_with(prefix))
            .count()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn next_state(&self) -> Option<Result<ServiceState, RunApiError>> {
        let mut rollout = self.rollout.lock().unwrap();
        if rollout.len() > 1 {
            rollout.pop_front()
        } else {
            rollout.front().cloned()
        }
    }
}

#[async_trait]
impl RunApi for FakeRunApi {
    async fn get_service(&self, name: &str) -> Result<KnativeService, RunApiError> {
        self.record(format!("get:{name}"));

        if let Some(err) = self.probe_error.lock().unwrap().take() {
            return Err(err);
        }

        let mut service = self
            .services
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or(RunApiError::NotFound)?;

        if *self.mutated.lock().unwrap() {
            match self.next_state() {
                Some(Ok(state)) => service.status = Some(state),
                Some(Err(err)) => return Err(err),
                None => service.status = None,
            }
        }

        Ok(service)
    }

    async fn create_service(&self, service: &KnativeService) -> Result<KnativeService, RunApiError> {
        self.record(format!("create:{}", service.metadata.name));
        self.submitted.lock().unwrap().push(service.clone());

        if let Some(err) = self.create_error.lock().unwrap().take() {
            return Err(err);
        }

        self.services
            .lock()
            .unwrap()
            .insert(service.metadata.name.clone(), service.clone());
        *self.mutated.lock().unwrap() = true;
        Ok(service.clone())
    }

    async fn replace_service(
        &self,
        service: &KnativeService,
    ) -> Result<KnativeService, RunApiError> {
        self.record(format!("replace:{}", service.metadata.name));
        self.submitted.lock().unwrap().push(service.clone());

        if let Some(err) = self.replace_error.lock().unwrap().take() {
            return Err(err);
        }

        self.services
            .lock()
            .unwrap()
            .insert(service.metadata.name.clone(), service.clone());
        *self.mutated.lock().unwrap() = true;
        Ok(service.clone())
    }

    async fn delete_service(&self, name: &str) -> Result<(), RunApiError> {
        self.record(format!("delete:{name}"));

        if let Some(err) = self.delete_error.lock().unwrap().take() {
            return Err(err);
        }

        self.services
            .lock()
            .unwrap()
            .remove(name)
            .map(|_| ())
            .ok_or(RunApiError::NotFound)
    }

    async fn get_iam_policy(&self, name: &str) -> Result<IamPolicy, RunApiError> {
        self.record(format!("get_iam:{name}"));
        Ok(self.policy.lock().unwrap().clone())
    }

    async fn set_iam_policy(
        &self,
        name: &str,
        policy: &IamPolicy,
    ) -> Result<IamPolicy, RunApiError> {
        self.record(format!("set_iam:{name}"));
        *self.policy.lock().unwrap() = policy.clone();
        Ok(policy.clone())
    }
}

pub fn condition(status: &str, message: Option<&str>) -> Condition {
    Condition {
        kind: "Ready".to_string(),
        status: status.to_string(),
        reason: None,
        message: message.map(str::to_string),
        last_transition_time: Some(transition_time()),
    }
}

pub fn transition_time() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z")
        .map(|t| t.with_timezone(&Utc))
        .unwrap()
}

pub fn in_progress() -> ServiceState {
    ServiceState {
        url: None,
        observed_generation: None,
        conditions: vec![condition("Unknown", None)],
    }
}

pub fn ready(url: &str) -> ServiceState {
    ServiceState {
        url: Some(url.to_string()),
        observed_generation: None,
        conditions: vec![condition("True", None)],
    }
}

pub fn failed(message: &str) -> ServiceState {
    ServiceState {
        url: None,
        observed_generation: None,
        conditions: vec![condition("False", Some(message))],
    }
}
