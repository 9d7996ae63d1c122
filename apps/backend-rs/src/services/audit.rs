use serde_json::Value;

/// Best-effort audit trail. Failures are logged, never surfaced to the
/// caller: the business mutation has already committed.
pub async fn write_audit_log(
    pool: Option<&sqlx::PgPool>,
    actor_user_id: Option<i64>,
    action: &str,
    entity_type: &str,
    entity_id: Option<i64>,
    before: Option<Value>,
    after: Option<Value>,
) {
    let Some(pool) = pool else {
        return;
    };

    let result = sqlx::query(
        "INSERT INTO audit_logs (action, entity_type, entity_id, actor_user_id, before_state, after_state)
         VALUES ($1, $2, $3, $4, $5, $6)",
    )
    .bind(action)
    .bind(entity_type)
    .bind(entity_id.map(|id| id.to_string()))
    .bind(actor_user_id)
    .bind(before)
    .bind(after)
    .execute(pool)
    .await;

    if let Err(error) = result {
        tracing::warn!(
            error = %error,
            action,
            entity_type,
            entity_id,
            "Could not write audit log"
        );
    }
}
