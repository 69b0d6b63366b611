//! Validate, authorize, run. Shared by queries and mutations.

use std::sync::Arc;

use livequery_core::Schema;
use serde_json::Value;

use crate::errors::EngineError;
use crate::handler::{Authorizer, Handler};

/// The parts of a definition the pipeline needs.
pub(crate) struct Stages<'a, C> {
    pub name: &'a str,
    pub schema: &'a dyn Schema,
    pub authorizer: Option<&'a dyn Authorizer<C>>,
    pub handler: &'a dyn Handler<C>,
}

/// Returns `(parsed params, handler result)`. The handler never runs when
/// validation or authorization fails.
pub(crate) async fn run<C>(
    stages: Stages<'_, C>,
    raw: &Value,
    ctx: Arc<C>,
    with_auth: bool,
) -> Result<(Value, Value), EngineError> {
    let Stages {
        name,
        schema,
        authorizer,
        handler,
    } = stages;

    let params = schema
        .safe_parse(raw)
        .map_err(|message| EngineError::Validation {
            name: name.to_owned(),
            message,
        })?;

    if let Some(authorizer) = authorizer.filter(|_| with_auth) {
        match authorizer.authorize(params.clone(), Arc::clone(&ctx)).await {
            Ok(true) => {}
            Ok(false) => {
                return Err(EngineError::Authorization {
                    name: name.to_owned(),
                    source: None,
                });
            }
            Err(e) => {
                return Err(EngineError::Authorization {
                    name: name.to_owned(),
                    source: Some(e),
                });
            }
        }
    }

    let result = handler
        .call(params.clone(), ctx)
        .await
        .map_err(|source| EngineError::Handler {
            name: name.to_owned(),
            source,
        })?;
    Ok((params, result))
}
