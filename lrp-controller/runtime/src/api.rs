use crate::{
    core::{Lrp, LrpIdentifier},
    workload::{self, Reconciler},
};
use bytes::Bytes;
use futures::future;
use http_body_util::BodyExt;
use hyper::{http, Request, Response};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, trace, warn};

/// Serves the LRP API over the reconciler.
#[derive(Clone)]
pub struct LrpApi {
    reconciler: Arc<Reconciler>,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read request body: {0}")]
    Request(#[from] hyper::Error),
}

type Body = http_body_util::Full<Bytes>;

// === impl LrpApi ===

impl tower::Service<Request<hyper::body::Incoming>> for LrpApi {
    type Response = Response<Body>;
    type Error = Error;
    type Future = future::BoxFuture<'static, Result<Response<Body>, Error>>;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<hyper::body::Incoming>) -> Self::Future {
        trace!(?req);
        let api = self.clone();
        Box::pin(async move {
            let (parts, body) = req.into_parts();
            let bytes = body.collect().await?.to_bytes();
            Ok(api.handle(Request::from_parts(parts, bytes)).await)
        })
    }
}

impl LrpApi {
    pub fn new(reconciler: Arc<Reconciler>) -> Self {
        Self { reconciler }
    }

    async fn handle(&self, req: Request<Bytes>) -> Response<Body> {
        let path = req.uri().path().trim_matches('/').to_string();
        let segments = path.split('/').collect::<Vec<_>>();
        let method = req.method().clone();
        debug!(%method, %path, "LRP API request");

        match (&method, segments.as_slice()) {
            (&http::Method::PUT, ["apps"]) => match parse(req.body()) {
                Ok(lrp) => respond(
                    http::StatusCode::ACCEPTED,
                    self.reconciler.desire(&lrp).await,
                ),
                Err(rsp) => rsp,
            },
            (&http::Method::GET, ["apps"]) => {
                respond(http::StatusCode::OK, self.reconciler.list().await)
            }
            (&http::Method::POST, ["apps", guid]) => match parse(req.body()) {
                Ok(mut lrp) => {
                    lrp.id.guid = guid.to_string();
                    respond(http::StatusCode::OK, self.reconciler.update(&lrp).await)
                }
                Err(rsp) => rsp,
            },
            (&http::Method::GET, ["apps", guid, version]) => respond(
                http::StatusCode::OK,
                self.reconciler.get(&LrpIdentifier::new(*guid, *version)).await,
            ),
            (&http::Method::GET, ["apps", guid, version, "instances"]) => respond(
                http::StatusCode::OK,
                self.reconciler
                    .get_instances(&LrpIdentifier::new(*guid, *version))
                    .await,
            ),
            (&http::Method::PUT, ["apps", guid, version, "stop"]) => respond(
                http::StatusCode::OK,
                self.reconciler
                    .stop(&LrpIdentifier::new(*guid, *version))
                    .await,
            ),
            (&http::Method::PUT, ["apps", guid, version, "stop", index]) => {
                let Ok(index) = index.parse::<u32>() else {
                    return error_response(
                        http::StatusCode::BAD_REQUEST,
                        &format!("invalid instance index: {index}"),
                    );
                };
                respond(
                    http::StatusCode::OK,
                    self.reconciler
                        .stop_instance(&LrpIdentifier::new(*guid, *version), index)
                        .await,
                )
            }
            _ => Response::builder()
                .status(http::StatusCode::NOT_FOUND)
                .body(Body::default())
                .expect("not found response must be valid"),
        }
    }
}

#[allow(clippy::result_large_err)]
fn parse(body: &Bytes) -> Result<Lrp, Response<Body>> {
    serde_json::from_slice(body).map_err(|error| {
        warn!(%error, "Failed to parse request body");
        error_response(http::StatusCode::BAD_REQUEST, &error.to_string())
    })
}

fn respond<T: Serialize>(ok: http::StatusCode, res: workload::Result<T>) -> Response<Body> {
    let error = match res {
        Ok(value) => return json_response(ok, &value),
        Err(error) => error,
    };
    let status = match error {
        workload::Error::AppNotFound => http::StatusCode::NOT_FOUND,
        workload::Error::AlreadyExists(_) => http::StatusCode::CONFLICT,
        _ => http::StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        warn!(%error, "LRP request failed");
    }
    error_response(status, &error.to_string())
}

fn error_response(status: http::StatusCode, message: &str) -> Response<Body> {
    json_response(status, &serde_json::json!({ "error": message }))
}

fn json_response<T: Serialize>(status: http::StatusCode, value: &T) -> Response<Body> {
    match serde_json::to_vec(value) {
        Ok(bytes) => Response::builder()
            .status(status)
            .header(http::header::CONTENT_TYPE, "application/json")
            .body(Body::from(bytes))
            .expect("json response must be valid"),
        Err(error) => {
            warn!(%error, "Failed to encode response");
            Response::builder()
                .status(http::StatusCode::INTERNAL_SERVER_ERROR)
                .body(Body::default())
                .expect("error response must be valid")
        }
    }
}
