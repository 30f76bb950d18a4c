//! 目录与历史服务的请求/应答处理。

use api_contract::{
    DEFAULT_LIMIT, ErrorReply, ReadDirectoryRequest, ReadDirectoryResponse, ReadHistoryRequest,
    ReadHistoryResponse, ReadLatestRequest, ReadLatestResponse, TOPIC_DIRECTORY_REQUEST,
    TOPIC_HISTORY_REQUEST, TOPIC_LATEST_REQUEST,
};
use domain::time::{millis_to_iso, now_epoch_ms, parse_iso_millis};
use domain::{ClientIdentity, ClientType, HubError, ThingAddr, ThingValue};
use hub_auth::ThingAuthorizer;
use hub_directory::{DirectoryCursor, DirectoryService};
use hub_history::{HistoryCursor, HistoryService};
use hub_resolver::Resolver;
use serde::Serialize;
use serde::de::DeserializeOwned;

pub(crate) struct RequestContext<'a> {
    pub identity: &'a ClientIdentity,
    pub resolver: &'a Resolver,
    pub authorizer: &'a dyn ThingAuthorizer,
}

impl RequestContext<'_> {
    fn client_id(&self) -> &str {
        &self.identity.client_id
    }

    /// 设备只能读取自己发布的 Thing；用户需要查看权限；服务不受限。
    async fn can_read(&self, addr: &ThingAddr) -> bool {
        match self.identity.client_type {
            ClientType::Service => true,
            ClientType::Device => addr.publisher_id == self.identity.client_id,
            ClientType::User => self.authorizer.can_view(self.client_id(), addr).await,
        }
    }

    async fn ensure_readable(&self, addr: &ThingAddr) -> Result<(), HubError> {
        if self.can_read(addr).await {
            return Ok(());
        }
        hub_telemetry::record_not_permitted();
        Err(HubError::not_permitted(format!(
            "{} may not view {addr}",
            self.client_id()
        )))
    }
}

pub(crate) async fn dispatch(
    context: &RequestContext<'_>,
    topic: &str,
    payload: &[u8],
) -> Result<Vec<u8>, HubError> {
    match topic {
        TOPIC_DIRECTORY_REQUEST => encode(&read_directory(context, parse(payload)?).await?),
        TOPIC_HISTORY_REQUEST => encode(&read_history(context, parse(payload)?).await?),
        TOPIC_LATEST_REQUEST => encode(&read_latest(context, parse(payload)?).await?),
        other => Err(HubError::invalid(format!("unknown service topic: {other}"))),
    }
}

pub(crate) fn error_reply(err: &HubError) -> Vec<u8> {
    let reply = ErrorReply::from(err);
    serde_json::to_vec(&reply).unwrap_or_else(|_| br#"{"code":"TRANSPORT","message":""}"#.to_vec())
}

fn parse<T: DeserializeOwned>(payload: &[u8]) -> Result<T, HubError> {
    let payload: &[u8] = if payload.iter().all(u8::is_ascii_whitespace) {
        b"{}"
    } else {
        payload
    };
    serde_json::from_slice(payload).map_err(|err| HubError::invalid(format!("request body: {err}")))
}

fn encode<T: Serialize>(reply: &T) -> Result<Vec<u8>, HubError> {
    serde_json::to_vec(reply).map_err(|err| HubError::Transport(format!("encode reply: {err}")))
}

fn effective_limit(limit: usize) -> usize {
    if limit == 0 { DEFAULT_LIMIT } else { limit }
}

fn require_address(publisher_id: &str, thing_id: &str) -> Result<ThingAddr, HubError> {
    if publisher_id.is_empty() {
        return Err(HubError::invalid("missing publisherID"));
    }
    if thing_id.is_empty() {
        return Err(HubError::invalid("missing thingID"));
    }
    Ok(ThingAddr::new(publisher_id, thing_id))
}

async fn read_directory(
    context: &RequestContext<'_>,
    request: ReadDirectoryRequest,
) -> Result<ReadDirectoryResponse, HubError> {
    let directory = context
        .resolver
        .get::<dyn DirectoryService>(hub_directory::CAPABILITY_NAME)
        .await?;
    let reader = directory.cap_read_directory(context.client_id());
    let mut cursor = match request.publisher_id.as_deref().filter(|id| !id.is_empty()) {
        Some(publisher_id) => reader.cursor_for_publisher(publisher_id).await?,
        None => reader.cursor().await?,
    };
    let limit = effective_limit(request.limit);
    let mut tds = Vec::new();
    let mut items_remaining = false;
    while let Some(td) = next_readable(context, cursor.as_mut()).await {
        if tds.len() == limit {
            items_remaining = true;
            break;
        }
        tds.push(td);
    }
    cursor.release();
    Ok(ReadDirectoryResponse {
        tds,
        items_remaining,
    })
}

async fn next_readable(
    context: &RequestContext<'_>,
    cursor: &mut dyn DirectoryCursor,
) -> Option<ThingValue> {
    while let Some(td) = cursor.next().await {
        if context.can_read(&td.address()).await {
            return Some(td);
        }
    }
    None
}

async fn read_history(
    context: &RequestContext<'_>,
    request: ReadHistoryRequest,
) -> Result<ReadHistoryResponse, HubError> {
    let addr = require_address(&request.publisher_id, &request.thing_id)?;
    context.ensure_readable(&addr).await?;
    let duration_ms = i64::try_from(request.duration)
        .ok()
        .and_then(|seconds| seconds.checked_mul(1000))
        .ok_or_else(|| HubError::invalid("duration out of range"))?;
    let start_ms = match request.start_time.as_deref().filter(|value| !value.is_empty()) {
        Some(start) => parse_iso_millis(start)
            .ok_or_else(|| HubError::invalid(format!("invalid startTime: {start}")))?,
        None => now_epoch_ms() - api_contract::DEFAULT_HISTORY_DURATION_SECONDS as i64 * 1000,
    };
    let start_time =
        millis_to_iso(start_ms).ok_or_else(|| HubError::invalid("startTime out of range"))?;
    let until = millis_to_iso(start_ms.saturating_add(duration_ms))
        .ok_or_else(|| HubError::invalid("duration out of range"))?;

    let history = context
        .resolver
        .get::<dyn HistoryService>(hub_history::CAPABILITY_NAME)
        .await?;
    let reader = history.cap_read_history(context.client_id(), &addr.publisher_id, &addr.thing_id);
    let mut cursor = reader.get_event_history(&request.name).await?;
    let limit = effective_limit(request.limit);
    let (values, items_remaining) = collect_range(cursor.as_mut(), &start_time, &until, limit).await;
    cursor.release();

    Ok(ReadHistoryResponse {
        publisher_id: request.publisher_id,
        thing_id: request.thing_id,
        name: request.name,
        start_time,
        duration: request.duration,
        values,
        items_remaining,
    })
}

async fn collect_range(
    cursor: &mut dyn HistoryCursor,
    start: &str,
    until: &str,
    limit: usize,
) -> (Vec<ThingValue>, bool) {
    let until_ms = parse_iso_millis(until);
    let Some(first) = cursor.seek(start).await else {
        return (Vec::new(), false);
    };
    match (first.created_millis(), until_ms) {
        (Some(created), Some(until_ms)) if created <= until_ms => {}
        _ => return (Vec::new(), false),
    }
    let mut values = vec![first];
    let (rest, remaining) = cursor.next_n_until(limit - 1, until).await;
    values.extend(rest);
    (values, remaining)
}

async fn read_latest(
    context: &RequestContext<'_>,
    request: ReadLatestRequest,
) -> Result<ReadLatestResponse, HubError> {
    let addr = require_address(&request.publisher_id, &request.thing_id)?;
    context.ensure_readable(&addr).await?;
    let history = context
        .resolver
        .get::<dyn HistoryService>(hub_history::CAPABILITY_NAME)
        .await?;
    let reader = history.cap_read_history(context.client_id(), &addr.publisher_id, &addr.thing_id);
    let values = reader.get_properties(&request.names).await?;
    Ok(ReadLatestResponse {
        publisher_id: request.publisher_id,
        thing_id: request.thing_id,
        values,
    })
}
