use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use miette::{IntoDiagnostic, Result};
use reqwest::StatusCode;
use serde_json::{Value, json};
use uuid::Uuid;

use xero_connector::{
    AuthorizationState, Client, CredentialBackend, Error, MemoryBackend, Operation, XeroEndpoint,
};


use test_utils::FakeXero;

/// Fake server plus a client whose store already holds `access_token` for
/// `tenant_id`.
async fn connected(
    tenant_id: Uuid,
    access_token: &str,
    expires_in: time::Duration,
) -> Result<(Arc<FakeXero>, Client)> {
    test_utils::do_setup();
    let fake = FakeXero::new(vec![tenant_id]);
    let base = test_utils::start(fake.clone()).await;
    let backend: Arc<dyn CredentialBackend> = Arc::new(MemoryBackend::new());
    let client = Client::new(&test_utils::config(&base), backend)?;
    client
        .store()
        .save_initial(
            tenant_id,
            test_utils::credential(tenant_id, access_token, expires_in),
        )
        .await?;
    Ok((fake, client))
}

#[tokio::test]
async fn valid_token_is_used_without_refresh() -> Result<()> {
    let tenant_id = Uuid::new_v4();
    let (fake, client) = connected(tenant_id, "access-live", time::Duration::minutes(30)).await?;

    let organisation: Value = client
        .call(tenant_id, &Operation::get(XeroEndpoint::Organisation))
        .await?;

    assert_eq!(organisation["Organisations"][0]["Name"], "Demo Company (NZ)");
    assert_eq!(fake.refresh_calls(), 0);
    assert_eq!(fake.api_calls(), 1);
    Ok(())
}

#[tokio::test]
async fn one_unauthorized_response_refreshes_exactly_once() -> Result<()> {
    let tenant_id = Uuid::new_v4();
    // The server no longer accepts access-0 although it has not expired locally.
    let (fake, client) = connected(tenant_id, "access-0", time::Duration::minutes(30)).await?;

    let organisation: Value = client
        .call(tenant_id, &Operation::get(XeroEndpoint::Organisation))
        .await?;

    assert!(organisation["Organisations"].is_array());
    assert_eq!(fake.refresh_calls(), 1);
    assert_eq!(fake.api_calls(), 2);

    let stored = client.store().get_credential(tenant_id).await?;
    assert_eq!(stored.access_token.secret(), "access-1");
    assert_eq!(stored.refresh_token.secret(), "refresh-1");
    Ok(())
}

#[tokio::test]
async fn second_unauthorized_response_is_auth_expired() -> Result<()> {
    let tenant_id = Uuid::new_v4();
    let (fake, client) = connected(tenant_id, "access-live", time::Duration::minutes(30)).await?;
    fake.reject_all_access.store(true, Ordering::SeqCst);

    let err = client
        .call::<Value>(tenant_id, &Operation::get(XeroEndpoint::Organisation))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::AuthExpired { tenant_id: t, .. } if t == tenant_id));
    assert!(err.requires_reauthorization());
    assert_eq!(fake.refresh_calls(), 1);
    assert_eq!(fake.api_calls(), 2);
    Ok(())
}

#[tokio::test]
async fn concurrent_rejections_share_one_refresh() -> Result<()> {
    let tenant_id = Uuid::new_v4();
    let (fake, client) = connected(tenant_id, "access-0", time::Duration::minutes(30)).await?;
    let client = Arc::new(client);

    let handles: Vec<_> = (0..6)
        .map(|_| {
            let client = Arc::clone(&client);
            tokio::spawn(async move {
                client
                    .call::<Value>(tenant_id, &Operation::get(XeroEndpoint::Organisation))
                    .await
            })
        })
        .collect();
    for handle in handles {
        handle.await.into_diagnostic()??;
    }

    assert_eq!(fake.refresh_calls(), 1);
    Ok(())
}

#[tokio::test]
async fn expiring_credential_is_refreshed_before_the_call() -> Result<()> {
    let tenant_id = Uuid::new_v4();
    let (fake, client) = connected(tenant_id, "access-old", time::Duration::seconds(20)).await?;

    let _: Value = client
        .call(tenant_id, &Operation::get(XeroEndpoint::Organisation))
        .await?;

    assert_eq!(fake.refresh_calls(), 1);
    // No 401 round trip was needed.
    assert_eq!(fake.api_calls(), 1);
    Ok(())
}

#[tokio::test]
async fn revoked_refresh_token_moves_tenant_to_unauthorized() -> Result<()> {
    let tenant_id = Uuid::new_v4();
    let (fake, client) = connected(tenant_id, "access-old", time::Duration::minutes(-1)).await?;
    fake.revoked.store(true, Ordering::SeqCst);

    let err = client
        .call::<Value>(tenant_id, &Operation::get(XeroEndpoint::Organisation))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::AuthExpired { .. }));
    assert_eq!(
        client.store().state(tenant_id).await?,
        AuthorizationState::Unauthorized
    );
    assert_eq!(fake.api_calls(), 0);

    // Nothing left to refresh until the tenant is authorized again.
    let err = client
        .call::<Value>(tenant_id, &Operation::get(XeroEndpoint::Organisation))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotConnected { .. }));
    assert_eq!(fake.refresh_calls(), 1);
    Ok(())
}

#[tokio::test]
async fn wrong_client_secret_keeps_the_tenant_connected() -> Result<()> {
    let tenant_id = Uuid::new_v4();
    let (fake, client) = connected(tenant_id, "access-old", time::Duration::minutes(-1)).await?;
    fake.bad_client.store(true, Ordering::SeqCst);

    let err = client
        .call::<Value>(tenant_id, &Operation::get(XeroEndpoint::Organisation))
        .await
        .unwrap_err();

    assert!(!err.requires_reauthorization());
    match &err {
        Error::RemoteApi { status, code, .. } => {
            assert_eq!(*status, StatusCode::UNAUTHORIZED);
            assert_eq!(code.as_deref(), Some("invalid_client"));
        }
        other => panic!("expected RemoteApi, got {other:?}"),
    }
    assert_eq!(
        client.store().state(tenant_id).await?,
        AuthorizationState::Valid
    );

    // Once the app credentials are fixed the stored refresh token still works.
    fake.bad_client.store(false, Ordering::SeqCst);
    let _: Value = client
        .call(tenant_id, &Operation::get(XeroEndpoint::Organisation))
        .await?;
    assert_eq!(fake.refresh_calls(), 2);
    Ok(())
}

#[tokio::test]
async fn validation_errors_keep_the_xero_code() -> Result<()> {
    let tenant_id = Uuid::new_v4();
    let (fake, client) = connected(tenant_id, "access-live", time::Duration::minutes(30)).await?;

    let operation = Operation::put(
        XeroEndpoint::Invoices,
        &json!({ "Invoices": [{ "Type": "ACCREC" }] }),
    )?;
    let err = client.call::<Value>(tenant_id, &operation).await.unwrap_err();

    match err {
        Error::RemoteApi {
            status,
            code,
            message,
            ..
        } => {
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(code.as_deref(), Some("ValidationException"));
            assert_eq!(message, "A validation exception occurred");
        }
        other => panic!("expected RemoteApi, got {other:?}"),
    }
    assert_eq!(fake.refresh_calls(), 0);
    Ok(())
}

#[tokio::test]
async fn rate_limit_carries_retry_after() -> Result<()> {
    let tenant_id = Uuid::new_v4();
    let (_fake, client) = connected(tenant_id, "access-live", time::Duration::minutes(30)).await?;

    let err = client
        .call::<Value>(tenant_id, &Operation::get(XeroEndpoint::custom("RateLimited")))
        .await
        .unwrap_err();

    assert!(err.is_retryable());
    match err {
        Error::RemoteApi {
            status,
            code,
            retry_after,
            ..
        } => {
            assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
            assert_eq!(code.as_deref(), Some("minute"));
            assert_eq!(retry_after, Some(Duration::from_secs(17)));
        }
        other => panic!("expected RemoteApi, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn query_unitdp_and_tenant_header_reach_xero() -> Result<()> {
    let tenant_id = Uuid::new_v4();
    let (_fake, client) = connected(tenant_id, "access-live", time::Duration::minutes(30)).await?;

    let response: Value = client
        .call(
            tenant_id,
            &Operation::get(XeroEndpoint::Invoices)
                .filter("Status==\"AUTHORISED\"")
                .unitdp(4),
        )
        .await?;

    assert_eq!(response["Echo"]["tenant"], tenant_id.to_string());
    assert_eq!(response["Echo"]["unitdp"], "4");
    assert_eq!(response["Echo"]["where"], "Status==\"AUTHORISED\"");
    Ok(())
}

#[tokio::test]
async fn empty_responses_decode_as_unit() -> Result<()> {
    let tenant_id = Uuid::new_v4();
    let (_fake, client) = connected(tenant_id, "access-live", time::Duration::minutes(30)).await?;

    client
        .call::<()>(tenant_id, &Operation::delete(XeroEndpoint::Item(Uuid::new_v4())))
        .await?;
    Ok(())
}

#[tokio::test]
async fn connections_are_listed_for_a_tenant() -> Result<()> {
    let tenant_id = Uuid::new_v4();
    let (_fake, client) = connected(tenant_id, "access-live", time::Duration::minutes(30)).await?;

    let connections = client.connections(tenant_id).await?;

    assert_eq!(connections.len(), 1);
    assert_eq!(connections[0].tenant_id, tenant_id);
    assert!(connections[0].is_organisation());
    Ok(())
}

#[tokio::test]
async fn unreachable_api_is_a_network_error() -> Result<()> {
    test_utils::do_setup();
    let tenant_id = Uuid::new_v4();
    let port = test_utils::free_port();
    let base = url::Url::parse(&format!("http://127.0.0.1:{port}/")).into_diagnostic()?;
    let client = Client::new(&test_utils::config(&base), Arc::new(MemoryBackend::new()))?;
    client
        .store()
        .save_initial(
            tenant_id,
            test_utils::credential(tenant_id, "access-live", time::Duration::minutes(30)),
        )
        .await?;

    let err = client
        .call::<Value>(tenant_id, &Operation::get(XeroEndpoint::Organisation))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Network { .. }));
    assert!(err.is_retryable());
    assert_eq!(
        client.store().state(tenant_id).await?,
        AuthorizationState::Valid
    );
    Ok(())
}

#[tokio::test]
async fn near_limit_responses_still_succeed() -> Result<()> {
    let tenant_id = Uuid::new_v4();
    let (_fake, client) = connected(tenant_id, "access-live", time::Duration::minutes(30)).await?;

    let response: Value = client
        .call(tenant_id, &Operation::get(XeroEndpoint::custom("NearLimit")))
        .await?;

    assert_eq!(response["ok"], true);
    Ok(())
}
