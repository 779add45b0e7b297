//! Redis 呼び出しの時間制限
//!
//! Redis が応答しなくなっても呼び出し側が止まらないよう、接続の確立を
//! 含めた 1 回の呼び出しを `REDIS_CALL_TIMEOUT` で打ち切る。

use std::{future::Future, time::Duration};

/// 1 回の Redis 呼び出しの制限時間
pub const REDIS_CALL_TIMEOUT: Duration = Duration::from_secs(2);

/// `call` を制限時間付きで実行し、エラーを各ポートのエラーに変換する
pub(crate) async fn redis_call<T, E, Fut>(call: Fut) -> Result<T, E>
where
    Fut: Future<Output = redis::RedisResult<T>>,
    E: From<redis::RedisError>,
{
    match tokio::time::timeout(REDIS_CALL_TIMEOUT, call).await {
        Ok(result) => result.map_err(E::from),
        Err(_) => Err(E::from(redis::RedisError::from((
            redis::ErrorKind::IoError,
            "redis call timed out",
        )))),
    }
}
