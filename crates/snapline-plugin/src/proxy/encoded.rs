//! Method dispatch for transports that carry session-`Encoder` payloads
//! (native and HTTP JSON-RPC).

use snapline_core::error::{Result, SnapError};
use snapline_rpc::args::{
    CollectMetricsArgs, CollectMetricsReply, GetConfigPolicyReply, GetMetricTypesArgs,
    GetMetricTypesReply, KillArgs, ProcessArgs, ProcessReply, PublishArgs, SetKeyArgs,
};
use snapline_rpc::method;

use super::Proxy;

/// Decode `body` for `method`, call the proxy, encode the reply.
pub async fn dispatch(proxy: &Proxy, method_name: &str, body: &[u8]) -> Result<Vec<u8>> {
    let enc = proxy.session().encoder();
    match method_name {
        method::PING => {
            proxy.ping();
            Ok(Vec::new())
        }
        method::KILL => {
            let args: KillArgs = enc.decode(body)?;
            proxy.kill(args.reason);
            Ok(Vec::new())
        }
        method::SET_KEY => {
            // The key is wrapped with the session public key, not the
            // (not yet installed) symmetric key.
            let plain = snapline_core::encoding::Encoder::new(enc.codec());
            let args: SetKeyArgs = plain.decode(body)?;
            proxy.set_key(&args.key)?;
            Ok(Vec::new())
        }
        method::GET_CONFIG_POLICY => {
            let policy = proxy.config_policy().await?;
            enc.encode(&GetConfigPolicyReply { policy })
        }
        method::COLLECT_METRICS => {
            let args: CollectMetricsArgs = enc.decode(body)?;
            let metrics = proxy.collect_metrics(args.metrics).await?;
            enc.encode(&CollectMetricsReply { metrics })
        }
        method::GET_METRIC_TYPES => {
            let args: GetMetricTypesArgs = enc.decode(body)?;
            let metric_types = proxy.get_metric_types(args.config).await?;
            enc.encode(&GetMetricTypesReply { metric_types })
        }
        method::PROCESS => {
            let args: ProcessArgs = enc.decode(body)?;
            let (content_type, content) = proxy
                .process(args.content_type, args.content, args.config)
                .await?;
            enc.encode(&ProcessReply {
                content_type,
                content,
            })
        }
        method::PUBLISH => {
            let args: PublishArgs = enc.decode(body)?;
            proxy
                .publish(args.content_type, args.content, args.config)
                .await?;
            Ok(Vec::new())
        }
        other => Err(SnapError::Protocol(format!("unknown method: {other}"))),
    }
}
