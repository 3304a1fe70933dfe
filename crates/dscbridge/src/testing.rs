//! Resource fixtures shared by the unit tests.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::bridge::{ArgMap, MAX_FIELD_LEN};
use crate::resource::{Arguments, Resource, ResourceContext, ResourceError, ResourceResult};

/// Answers every query with `Msg = "hi"` followed by the arguments it got.
pub struct Echo;

#[async_trait::async_trait]
impl Resource for Echo {
    async fn verify(
        &self,
        _ctx: &ResourceContext,
        _args: Arguments,
    ) -> Result<ResourceResult, ResourceError> {
        Ok(ResourceResult::ok())
    }

    async fn apply(
        &self,
        _ctx: &ResourceContext,
        _args: Arguments,
    ) -> Result<ResourceResult, ResourceError> {
        Ok(ResourceResult::ok())
    }

    async fn query(
        &self,
        _ctx: &ResourceContext,
        args: Arguments,
    ) -> Result<ResourceResult, ResourceError> {
        let mut outputs = ArgMap::new();
        outputs.insert("Msg".into(), "hi".into());
        outputs.extend(args.into_inner());
        Ok(ResourceResult::ok_with(outputs))
    }
}

/// Returns a fixed code from every operation.
pub struct Status(pub i32);

#[async_trait::async_trait]
impl Resource for Status {
    async fn verify(
        &self,
        _ctx: &ResourceContext,
        _args: Arguments,
    ) -> Result<ResourceResult, ResourceError> {
        Ok(ResourceResult::failed(self.0))
    }

    async fn apply(
        &self,
        _ctx: &ResourceContext,
        _args: Arguments,
    ) -> Result<ResourceResult, ResourceError> {
        Ok(ResourceResult::failed(self.0))
    }

    async fn query(
        &self,
        _ctx: &ResourceContext,
        _args: Arguments,
    ) -> Result<ResourceResult, ResourceError> {
        Ok(ResourceResult::failed(self.0))
    }
}

/// Answers every query with a string longer than the wire allows.
pub struct Oversized;

#[async_trait::async_trait]
impl Resource for Oversized {
    async fn verify(
        &self,
        _ctx: &ResourceContext,
        _args: Arguments,
    ) -> Result<ResourceResult, ResourceError> {
        Ok(ResourceResult::ok())
    }

    async fn apply(
        &self,
        _ctx: &ResourceContext,
        _args: Arguments,
    ) -> Result<ResourceResult, ResourceError> {
        Ok(ResourceResult::ok())
    }

    async fn query(
        &self,
        _ctx: &ResourceContext,
        _args: Arguments,
    ) -> Result<ResourceResult, ResourceError> {
        let mut outputs = ArgMap::new();
        outputs.insert("Blob".into(), "x".repeat(MAX_FIELD_LEN + 1).into());
        Ok(ResourceResult::ok_with(outputs))
    }
}

pub struct Failing;

#[async_trait::async_trait]
impl Resource for Failing {
    async fn verify(
        &self,
        _ctx: &ResourceContext,
        _args: Arguments,
    ) -> Result<ResourceResult, ResourceError> {
        Err(ResourceError::failed("config unreadable"))
    }

    async fn apply(
        &self,
        _ctx: &ResourceContext,
        _args: Arguments,
    ) -> Result<ResourceResult, ResourceError> {
        Err(ResourceError::failed("config unreadable"))
    }

    async fn query(
        &self,
        _ctx: &ResourceContext,
        _args: Arguments,
    ) -> Result<ResourceResult, ResourceError> {
        Err(ResourceError::failed("config unreadable"))
    }
}

pub struct Panicking;

#[async_trait::async_trait]
impl Resource for Panicking {
    async fn verify(
        &self,
        _ctx: &ResourceContext,
        _args: Arguments,
    ) -> Result<ResourceResult, ResourceError> {
        panic!("handler exploded")
    }

    async fn apply(
        &self,
        _ctx: &ResourceContext,
        _args: Arguments,
    ) -> Result<ResourceResult, ResourceError> {
        panic!("handler exploded")
    }

    async fn query(
        &self,
        _ctx: &ResourceContext,
        _args: Arguments,
    ) -> Result<ResourceResult, ResourceError> {
        panic!("handler exploded")
    }
}

pub struct Slow;

impl Slow {
    async fn wait() -> Result<ResourceResult, ResourceError> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(ResourceResult::ok())
    }
}

#[async_trait::async_trait]
impl Resource for Slow {
    async fn verify(
        &self,
        _ctx: &ResourceContext,
        _args: Arguments,
    ) -> Result<ResourceResult, ResourceError> {
        Self::wait().await
    }

    async fn apply(
        &self,
        _ctx: &ResourceContext,
        _args: Arguments,
    ) -> Result<ResourceResult, ResourceError> {
        Self::wait().await
    }

    async fn query(
        &self,
        _ctx: &ResourceContext,
        _args: Arguments,
    ) -> Result<ResourceResult, ResourceError> {
        Self::wait().await
    }
}

/// Records which operation ran and with which argument names.
#[derive(Clone, Default)]
pub struct Recording {
    calls: Arc<Mutex<Vec<(&'static str, Vec<String>)>>>,
}

impl Recording {
    fn record(
        &self,
        operation: &'static str,
        args: &Arguments,
    ) -> Result<ResourceResult, ResourceError> {
        let names = args.names().map(str::to_string).collect();
        self.calls.lock().unwrap().push((operation, names));
        Ok(ResourceResult::ok())
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(op, _)| op.to_string())
            .collect()
    }

    pub fn last_argument_names(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .last()
            .map(|(_, names)| names.clone())
            .unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl Resource for Recording {
    async fn verify(
        &self,
        _ctx: &ResourceContext,
        args: Arguments,
    ) -> Result<ResourceResult, ResourceError> {
        self.record("verify", &args)
    }

    async fn apply(
        &self,
        _ctx: &ResourceContext,
        args: Arguments,
    ) -> Result<ResourceResult, ResourceError> {
        self.record("apply", &args)
    }

    async fn query(
        &self,
        _ctx: &ResourceContext,
        args: Arguments,
    ) -> Result<ResourceResult, ResourceError> {
        self.record("query", &args)
    }
}
