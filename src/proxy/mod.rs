//! The intercepting JSON-RPC proxy.
//!
//! Every POSTed entry is classified: send/sign methods are scanned and
//! gated, `eth_chainId` passes through with its result memoized for chain
//! inference, everything else forwards verbatim. Batches are processed in
//! order. A recording stub hits the disk before any scan resolves, and the
//! decision is always made before the upstream sees the entry.
//!
//! Fail-closed: if the scan errors out between interception and decision,
//! the entry is treated as `{recommendation: caution, simulation failed}`,
//! which blocks in a non-interactive session.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors;
use url::Url;

pub mod raw_tx;
pub mod recording;

use crate::calldata::typed_data::analyze_typed_data;
use crate::calldata::{AuthorizationEntry, CalldataInput, parse_quantity};
use crate::chains::{Chain, EvmAddress};
use crate::findings::Recommendation;
use crate::policy::{
    Decision, RiskPolicy, apply_allowlist, decide_risk_action, evaluate_allowlist,
};
use crate::providers::AnalyzeMode;
use crate::scan::{AssayCore, ScanError, ScanInput, ScanOptions, render_summary, scan_with_analysis};
use crate::util::SigDown;
use recording::{RecordStatus, RecordingBundle, RecordingWriter};

const BLOCKED_MESSAGE: &str = "Transaction blocked by assay";

const INTERCEPTED_METHODS: &[&str] = &[
    "eth_sendTransaction",
    "eth_sendRawTransaction",
    "eth_signTypedData_v4",
];

/// Proxy runtime options.
#[derive(Debug, Clone)]
pub struct ProxyOptions {
    pub upstream: Url,
    pub record_dir: Option<PathBuf>,
    pub once: bool,
    pub quiet: bool,
    pub interactive: bool,
    pub policy: RiskPolicy,
    pub mode: AnalyzeMode,
}

/// Shared proxy state.
pub struct ProxyState {
    core: Arc<AssayCore>,
    options: ProxyOptions,
    http: reqwest::Client,
    recorder: RecordingWriter,
    chain_id: tokio::sync::OnceCell<u64>,
    shutdown: Arc<SigDown>,
}

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("Offline mode refuses upstream {0}; only the configured RPC URL or localhost is allowed")]
    OfflineUpstream(Url),
    #[error("Failed to bind {0}: {1}")]
    Bind(SocketAddr, std::io::Error),
}

impl ProxyState {
    pub fn new(
        core: Arc<AssayCore>,
        options: ProxyOptions,
        shutdown: Arc<SigDown>,
    ) -> Result<Self, ProxyError> {
        if core.offline && !upstream_allowed(&core, &options.upstream) {
            return Err(ProxyError::OfflineUpstream(options.upstream.clone()));
        }
        let recorder = RecordingWriter::new(options.record_dir.clone());
        Ok(Self {
            core,
            options,
            http: reqwest::Client::new(),
            recorder,
            chain_id: tokio::sync::OnceCell::new(),
            shutdown,
        })
    }

    async fn upstream_chain(&self) -> Option<Chain> {
        let id = self
            .chain_id
            .get_or_try_init(|| async {
                let body = json!({
                    "jsonrpc": "2.0",
                    "id": 1,
                    "method": "eth_chainId",
                    "params": [],
                });
                let response: Value = self
                    .http
                    .post(self.options.upstream.clone())
                    .json(&body)
                    .send()
                    .await?
                    .json()
                    .await?;
                let hex_id = response
                    .get("result")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                Ok::<u64, reqwest::Error>(
                    u64::from_str_radix(hex_id.trim_start_matches("0x"), 16).unwrap_or(0),
                )
            })
            .await
            .ok()?;
        Chain::from_chain_id(*id)
    }

    fn trigger_once(&self) {
        if self.options.once {
            self.shutdown.shutdown_after_flush();
        }
    }
}

fn upstream_allowed(core: &AssayCore, upstream: &Url) -> bool {
    if matches!(upstream.host_str(), Some("localhost") | Some("127.0.0.1")) {
        return true;
    }
    Chain::ALL.into_iter().any(|chain| {
        core.config.has_configured_rpc(chain) && core.config.rpc_url(chain) == *upstream
    })
}

/// Build the proxy router.
pub fn router(state: Arc<ProxyState>) -> Router {
    Router::new()
        .route("/", get(get_liveness))
        .route("/", post(post_rpc))
        .with_state(state)
        .layer(
            cors::CorsLayer::new()
                .allow_origin(cors::Any)
                .allow_methods(cors::Any)
                .allow_headers(cors::Any),
        )
}

/// Serve until the shutdown token fires.
pub async fn serve(state: Arc<ProxyState>, addr: SocketAddr) -> Result<(), ProxyError> {
    let shutdown = state.shutdown.cancellation_token();
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ProxyError::Bind(addr, e))?;
    tracing::info!("assay proxy listening at http://{addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| ProxyError::Bind(addr, e))?;
    Ok(())
}

/// `GET /`: liveness probe.
#[tracing::instrument(skip_all)]
async fn get_liveness() -> impl IntoResponse {
    Json(json!({
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "chains": Chain::ALL.iter().map(|c| c.to_string()).collect::<Vec<_>>(),
    }))
}

/// `POST /`: JSON-RPC entry point, single entries and batches.
#[tracing::instrument(skip_all)]
async fn post_rpc(State(state): State<Arc<ProxyState>>, body: axum::body::Bytes) -> Response {
    let payload: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(_) => {
            let error = rpc_error(Value::Null, -32700, "Parse error", None);
            return (StatusCode::BAD_REQUEST, Json(error)).into_response();
        }
    };

    match payload {
        Value::Array(entries) => {
            if entries.is_empty() {
                let error = rpc_error(Value::Null, -32600, "Invalid request", None);
                return (StatusCode::OK, Json(error)).into_response();
            }
            // Entries are processed in order so recordings and decisions
            // are externally observable in entry order.
            let mut responses = Vec::new();
            for entry in &entries {
                if let Some(response) = process_entry(&state, entry).await {
                    responses.push(response);
                }
            }
            if responses.is_empty() {
                StatusCode::NO_CONTENT.into_response()
            } else {
                (StatusCode::OK, Json(Value::Array(responses))).into_response()
            }
        }
        entry => match process_entry(&state, &entry).await {
            Some(response) => (StatusCode::OK, Json(response)).into_response(),
            None => StatusCode::NO_CONTENT.into_response(),
        },
    }
}

/// Handle one JSON-RPC entry; `None` means notification (no response body).
async fn process_entry(state: &Arc<ProxyState>, entry: &Value) -> Option<Value> {
    let Some(object) = entry.as_object() else {
        return Some(rpc_error(Value::Null, -32600, "Invalid request", None));
    };
    let id = object.get("id").cloned().filter(|id| !id.is_null());
    if object.get("jsonrpc").and_then(Value::as_str) != Some("2.0") {
        return Some(rpc_error(
            id.unwrap_or(Value::Null),
            -32600,
            "Invalid request",
            None,
        ));
    }
    let Some(method) = object.get("method").and_then(Value::as_str) else {
        return Some(rpc_error(
            id.unwrap_or(Value::Null),
            -32600,
            "Invalid request",
            None,
        ));
    };

    if !INTERCEPTED_METHODS.contains(&method) {
        if method == "eth_chainId" {
            // Warm the memoized chain id off the same upstream answer path.
            let _ = state.upstream_chain().await;
        }
        return forward_upstream(state, entry, id).await;
    }

    let params = object.get("params").cloned().unwrap_or(Value::Null);
    match method {
        "eth_sendTransaction" => match parse_send_transaction_params(&params) {
            Ok(calldata) => intercept_send(state, entry, id, method, calldata).await,
            Err(reason) => Some(rpc_error(
                id.unwrap_or(Value::Null),
                -32602,
                &format!("Invalid params: {reason}"),
                None,
            )),
        },
        "eth_sendRawTransaction" => {
            let raw = params.get(0).and_then(Value::as_str).unwrap_or_default();
            match raw_tx::decode_raw_transaction(raw) {
                Ok(calldata) => intercept_send(state, entry, id, method, calldata).await,
                Err(err) => Some(rpc_error(
                    id.unwrap_or(Value::Null),
                    -32602,
                    &format!("Invalid params: {err}"),
                    None,
                )),
            }
        }
        "eth_signTypedData_v4" => intercept_sign_typed_data(state, entry, id, &params).await,
        _ => unreachable!("interception set covered above"),
    }
}

/// Scan-and-decide for send-transaction entries.
async fn intercept_send(
    state: &Arc<ProxyState>,
    entry: &Value,
    id: Option<Value>,
    method: &str,
    mut calldata: CalldataInput,
) -> Option<Value> {
    let total_started = Instant::now();
    let chain = match calldata.chain {
        Some(chain) => chain,
        None => state.upstream_chain().await.unwrap_or(Chain::Ethereum),
    };
    calldata.chain = Some(chain);

    // Stub before the scan: a dropped client or killed process still
    // leaves an artifact.
    let bundle = state.recorder.start(method, chain, Some(&calldata), entry);

    let scan = scan_with_analysis(
        &state.core,
        ScanInput {
            address: None,
            calldata: Some(calldata),
        },
        ScanOptions {
            chain: Some(chain),
            mode: state.options.mode,
            request_id: None,
            parent: Some(state.shutdown.cancellation_token()),
        },
    )
    .await;

    let outcome = match scan {
        Ok(outcome) => outcome,
        Err(ScanError::Validation(reason)) => {
            finalize(bundle, RecordStatus::Error, None, None, None);
            state.trigger_once();
            return Some(rpc_error(
                id.unwrap_or(Value::Null),
                -32602,
                &format!("Invalid params: {reason}"),
                None,
            ));
        }
        Err(err) => {
            // Fail closed: an unscanned transaction is treated as caution
            // with a failed simulation.
            tracing::warn!(error = %err, "scan failed; failing closed");
            let decision = decide_risk_action(
                Recommendation::Caution,
                false,
                &state.options.policy,
                state.options.interactive,
            );
            let decision = resolve_prompt(state, decision, "scan failed").await;
            finalize(bundle, RecordStatus::Error, Some(decision), None, None);
            state.trigger_once();
            return match decision {
                Decision::Forward => forward_upstream(state, entry, id).await,
                _ => id.map(|id| {
                    rpc_error(
                        id,
                        4001,
                        BLOCKED_MESSAGE,
                        Some(json!({
                            "recommendation": Recommendation::Caution,
                            "simulationSuccess": false,
                            "error": err.to_string(),
                        })),
                    )
                }),
            };
        }
    };

    let response = outcome.response;
    let mut timings = outcome.timings;
    timings.insert("proxy.queueWait".to_string(), outcome.queue_wait_ms);

    let allowlist = state.core.config.allowlist.clone().unwrap_or_default();
    let report = evaluate_allowlist(&allowlist, &response);

    let simulation_success = response
        .scan
        .simulation
        .as_ref()
        .map(|s| s.success)
        .unwrap_or(true);
    let decision = decide_risk_action(
        response.scan.recommendation,
        simulation_success,
        &state.options.policy,
        state.options.interactive,
    );
    let decision = apply_allowlist(decision, &report, &state.options.policy, state.options.interactive);

    let render_started = Instant::now();
    let rendered = if state.options.quiet {
        None
    } else {
        let mut text = render_summary(&response);
        timings.insert(
            "proxy.render".to_string(),
            render_started.elapsed().as_millis(),
        );
        timings.insert("proxy.total".to_string(), total_started.elapsed().as_millis());
        let mut keys: Vec<_> = timings.iter().collect();
        keys.sort();
        for (key, ms) in keys {
            text.push_str(&format!("timing {key}: {ms}ms\n"));
        }
        Some(text)
    };

    let prompt_line = response
        .scan
        .intent
        .clone()
        .unwrap_or_else(|| "intercepted transaction".to_string());
    let decision = resolve_prompt(state, decision, &prompt_line).await;

    // Block-reason metadata: allowlist violations clamp the reported
    // recommendation to at least warning.
    let mut reported_recommendation = response.scan.recommendation;
    if !report.is_clean() {
        reported_recommendation = reported_recommendation.max(Recommendation::Warning);
    }

    let out = match decision {
        Decision::Forward => {
            finalize(
                bundle,
                RecordStatus::Forwarded,
                Some(Decision::Forward),
                Some(&response),
                rendered.as_deref(),
            );
            forward_upstream(state, entry, id).await
        }
        _ => {
            finalize(
                bundle,
                RecordStatus::Blocked,
                Some(Decision::Block),
                Some(&response),
                rendered.as_deref(),
            );
            let mut data = json!({
                "recommendation": reported_recommendation,
                "simulationSuccess": simulation_success,
            });
            if !report.is_clean() {
                data["allowlist"] = serde_json::to_value(&report).unwrap_or(Value::Null);
            }
            id.map(|id| rpc_error(id, 4001, BLOCKED_MESSAGE, Some(data)))
        }
    };
    state.trigger_once();
    out
}

/// Scan-and-decide for typed-data signing entries.
async fn intercept_sign_typed_data(
    state: &Arc<ProxyState>,
    entry: &Value,
    id: Option<Value>,
    params: &Value,
) -> Option<Value> {
    let signer = params
        .get(0)
        .and_then(Value::as_str)
        .and_then(|s| s.parse::<EvmAddress>().ok());
    let typed = match params.get(1) {
        Some(Value::String(raw)) => match serde_json::from_str::<Value>(raw) {
            Ok(value) => value,
            Err(_) => {
                return Some(rpc_error(
                    id.unwrap_or(Value::Null),
                    -32602,
                    "Invalid params: typed data is not valid JSON",
                    None,
                ));
            }
        },
        Some(value @ Value::Object(_)) => value.clone(),
        _ => {
            return Some(rpc_error(
                id.unwrap_or(Value::Null),
                -32602,
                "Invalid params: missing typed data",
                None,
            ));
        }
    };

    let chain = state.upstream_chain().await.unwrap_or(Chain::Ethereum);
    let verifying_contract = typed
        .pointer("/domain/verifyingContract")
        .and_then(Value::as_str)
        .and_then(|s| s.parse::<EvmAddress>().ok())
        .unwrap_or(EvmAddress(alloy_primitives::Address::ZERO));
    let calldata = CalldataInput {
        to: verifying_contract,
        from: signer,
        data: Default::default(),
        value: None,
        chain: Some(chain),
        authorization_list: None,
    };
    let bundle = state
        .recorder
        .start("eth_signTypedData_v4", chain, Some(&calldata), entry);

    let analysis = analyze_typed_data(&typed);
    // Nothing executes for a signature, so the permit classification alone
    // drives the decision.
    let decision = decide_risk_action(
        analysis.recommendation,
        true,
        &state.options.policy,
        state.options.interactive,
    );
    let prompt_line = analysis
        .intent
        .clone()
        .unwrap_or_else(|| format!("sign typed data ({})", analysis.primary_type));
    let decision = resolve_prompt(state, decision, &prompt_line).await;

    let rendered = (!state.options.quiet).then(|| {
        let mut text = format!(
            "typed data: {}\nrecommendation: {}\n",
            analysis.primary_type, analysis.recommendation
        );
        for finding in &analysis.findings {
            text.push_str(&format!("[{:?}] {}: {}\n", finding.level, finding.code, finding.message));
        }
        text
    });

    let out = match decision {
        Decision::Forward => {
            finalize(
                bundle,
                RecordStatus::Forwarded,
                Some(Decision::Forward),
                None,
                rendered.as_deref(),
            );
            forward_upstream(state, entry, id).await
        }
        _ => {
            finalize(
                bundle,
                RecordStatus::Blocked,
                Some(Decision::Block),
                None,
                rendered.as_deref(),
            );
            id.map(|id| {
                rpc_error(
                    id,
                    4001,
                    BLOCKED_MESSAGE,
                    Some(json!({
                        "recommendation": analysis.recommendation,
                        "simulationSuccess": true,
                        "primaryType": analysis.primary_type,
                    })),
                )
            })
        }
    };
    state.trigger_once();
    out
}

/// Prompt resolution: interactive sessions ask, everything else already
/// resolved to forward/block.
async fn resolve_prompt(state: &Arc<ProxyState>, decision: Decision, prompt: &str) -> Decision {
    if decision != Decision::Prompt {
        return decision;
    }
    let question = format!("assay: {prompt}\nForward anyway? [y/N] ");
    let confirmed = tokio::task::spawn_blocking(move || {
        use std::io::Write;
        eprint!("{question}");
        let _ = std::io::stderr().flush();
        let mut line = String::new();
        if std::io::stdin().read_line(&mut line).is_err() {
            return false;
        }
        matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes")
    })
    .await
    .unwrap_or(false);
    if confirmed {
        Decision::Forward
    } else {
        Decision::Block
    }
}

fn finalize(
    bundle: Option<RecordingBundle>,
    status: RecordStatus,
    action: Option<Decision>,
    response: Option<&crate::scan::ScanResponse>,
    rendered: Option<&str>,
) {
    if let Some(bundle) = bundle {
        bundle.finalize(status, action, response, rendered);
    }
}

/// Forward the original entry upstream verbatim; `None` for notifications.
async fn forward_upstream(
    state: &Arc<ProxyState>,
    entry: &Value,
    id: Option<Value>,
) -> Option<Value> {
    let result = state
        .http
        .post(state.options.upstream.clone())
        .json(entry)
        .send()
        .await;
    let response = match result {
        Ok(response) => response,
        Err(err) => {
            return id.map(|id| {
                rpc_error(id, -32000, &format!("Upstream request failed: {err}"), None)
            });
        }
    };
    match response.json::<Value>().await {
        Ok(body) => id.map(|_| body),
        Err(err) => id.map(|id| {
            rpc_error(
                id,
                -32000,
                &format!("Upstream returned invalid JSON: {err}"),
                None,
            )
        }),
    }
}

fn rpc_error(id: Value, code: i64, message: &str, data: Option<Value>) -> Value {
    let mut error = json!({
        "code": code,
        "message": message,
    });
    if let Some(data) = data {
        error["data"] = data;
    }
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": error,
    })
}

/// Parse `eth_sendTransaction` params. Malformed authorization entries are
/// dropped silently; a missing `to` is a hard error (contract creation is
/// not an interceptable shape).
pub(crate) fn parse_send_transaction_params(params: &Value) -> Result<CalldataInput, String> {
    let tx = params
        .get(0)
        .and_then(Value::as_object)
        .ok_or_else(|| "missing transaction object".to_string())?;
    let to: EvmAddress = tx
        .get("to")
        .and_then(Value::as_str)
        .ok_or_else(|| "missing 'to'".to_string())?
        .parse()
        .map_err(|_| "invalid 'to' address".to_string())?;
    let from = tx
        .get("from")
        .and_then(Value::as_str)
        .and_then(|s| s.parse::<EvmAddress>().ok());
    let data = tx
        .get("data")
        .or_else(|| tx.get("input"))
        .and_then(Value::as_str)
        .map(|s| hex::decode(s.trim_start_matches("0x")).map_err(|_| "invalid calldata hex"))
        .transpose()?
        .map(alloy_primitives::Bytes::from)
        .unwrap_or_default();
    let value = tx
        .get("value")
        .and_then(Value::as_str)
        .map(|s| parse_quantity(s).map_err(|_| "invalid value"))
        .transpose()?;
    let chain = tx
        .get("chainId")
        .and_then(Value::as_str)
        .and_then(|s| parse_quantity(s).ok())
        .and_then(|id| u64::try_from(id).ok())
        .and_then(Chain::from_chain_id);

    let authorization_list = tx.get("authorizationList").and_then(Value::as_array).map(|list| {
        list.iter()
            .filter_map(|item| {
                let address = item
                    .get("address")?
                    .as_str()?
                    .parse::<EvmAddress>()
                    .ok()?;
                let chain_id = item.get("chainId")?.as_u64()?;
                let nonce = item.get("nonce")?.as_u64()?;
                Some(AuthorizationEntry {
                    address,
                    chain_id,
                    nonce,
                })
            })
            .collect::<Vec<_>>()
    });

    Ok(CalldataInput {
        to,
        from,
        data,
        value,
        chain,
        authorization_list,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_send_transaction_params() {
        let params = json!([{
            "from": "0x1111111111111111111111111111111111111111",
            "to": "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48",
            "data": "0xa9059cbb",
            "value": "0x0de0b6b3a7640000",
            "authorizationList": [
                { "address": "0x1234000000000000000000000000000000005678", "chainId": 1, "nonce": 7 },
                { "address": "not-an-address", "chainId": 1, "nonce": 0 },
                { "chainId": 1, "nonce": 0 }
            ]
        }]);
        let calldata = parse_send_transaction_params(&params).unwrap();
        assert_eq!(
            calldata.to.to_string(),
            "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48"
        );
        assert_eq!(calldata.data.len(), 4);
        assert_eq!(
            calldata.value.unwrap().to_string(),
            "1000000000000000000"
        );
        // Malformed authorization entries are dropped silently.
        let auth = calldata.authorization_list.unwrap();
        assert_eq!(auth.len(), 1);
        assert_eq!(auth[0].chain_id, 1);
        assert_eq!(auth[0].nonce, 7);
    }

    #[test]
    fn missing_to_is_an_error() {
        let params = json!([{ "from": "0x1111111111111111111111111111111111111111" }]);
        assert!(parse_send_transaction_params(&params).is_err());
    }

    #[test]
    fn rpc_error_shape() {
        let error = rpc_error(json!(1), 4001, BLOCKED_MESSAGE, Some(json!({"x": 1})));
        assert_eq!(error["jsonrpc"], "2.0");
        assert_eq!(error["id"], 1);
        assert_eq!(error["error"]["code"], 4001);
        assert_eq!(error["error"]["message"], BLOCKED_MESSAGE);
        assert_eq!(error["error"]["data"]["x"], 1);
    }
}
