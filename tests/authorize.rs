use std::sync::Arc;

use miette::Result;
use serde_json::Value;
use uuid::Uuid;

use xero_connector::{
    AuthorizationState, Client, Error, MemoryBackend, Operation, XeroEndpoint,
};


use test_utils::{FakeXero, GOOD_CODE};

#[tokio::test]
async fn authorize_url_points_at_the_identity_server() -> Result<()> {
    test_utils::do_setup();
    let fake = FakeXero::new(vec![Uuid::new_v4()]);
    let base = test_utils::start(fake).await;
    let client = Client::new(&test_utils::config(&base), Arc::new(MemoryBackend::new()))?;

    let (url, csrf) = client.authorize_url()?;

    assert!(url.as_str().starts_with(base.join("connect/authorize").unwrap().as_str()));
    let state = url
        .query_pairs()
        .find(|(k, _)| k == "state")
        .map(|(_, v)| v.into_owned());
    assert_eq!(state.as_deref(), Some(csrf.secret().as_str()));
    Ok(())
}

#[tokio::test]
async fn code_flow_connects_the_only_organisation() -> Result<()> {
    test_utils::do_setup();
    let tenant_id = Uuid::new_v4();
    let fake = FakeXero::new(vec![tenant_id]);
    let base = test_utils::start(fake.clone()).await;
    let client = Client::new(&test_utils::config(&base), Arc::new(MemoryBackend::new()))?;
    assert_eq!(
        client.store().state(tenant_id).await?,
        AuthorizationState::Unauthorized
    );

    let connection = client
        .complete_authorization(GOOD_CODE.to_string(), None)
        .await?;

    assert_eq!(connection.tenant_id, tenant_id);
    assert_eq!(connection.tenant_name.as_deref(), Some("Demo Company 0"));
    assert_eq!(fake.code_calls(), 1);
    assert_eq!(
        client.store().state(tenant_id).await?,
        AuthorizationState::Valid
    );

    // The issued token works straight away.
    let _: Value = client
        .call(tenant_id, &Operation::get(XeroEndpoint::Organisation))
        .await?;
    assert_eq!(fake.refresh_calls(), 0);
    let stored = client.store().get_credential(tenant_id).await?;
    assert_eq!(stored.access_token.secret(), &fake.current_access_token());
    Ok(())
}

#[tokio::test]
async fn code_flow_with_several_tenants_needs_a_choice() -> Result<()> {
    test_utils::do_setup();
    let first = Uuid::new_v4();
    let second = Uuid::new_v4();
    let fake = FakeXero::new(vec![first, second]);
    let base = test_utils::start(fake.clone()).await;
    let client = Client::new(&test_utils::config(&base), Arc::new(MemoryBackend::new()))?;

    let err = client
        .complete_authorization(GOOD_CODE.to_string(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Config(_)));

    let connection = client
        .complete_authorization(GOOD_CODE.to_string(), Some(second))
        .await?;
    assert_eq!(connection.tenant_id, second);
    assert_eq!(client.store().state(second).await?, AuthorizationState::Valid);
    assert_eq!(client.store().state(first).await?, AuthorizationState::Unauthorized);
    Ok(())
}

#[tokio::test]
async fn repeated_authorization_conflicts() -> Result<()> {
    test_utils::do_setup();
    let tenant_id = Uuid::new_v4();
    let fake = FakeXero::new(vec![tenant_id]);
    let base = test_utils::start(fake).await;
    let client = Client::new(&test_utils::config(&base), Arc::new(MemoryBackend::new()))?;

    client
        .complete_authorization(GOOD_CODE.to_string(), None)
        .await?;
    let before = client.store().get_credential(tenant_id).await?;

    let err = client
        .complete_authorization(GOOD_CODE.to_string(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Conflict { tenant_id: t } if t == tenant_id));

    let after = client.store().get_credential(tenant_id).await?;
    assert!(after.same_tokens(&before));
    Ok(())
}

#[tokio::test]
async fn rejected_code_requires_reauthorization() -> Result<()> {
    test_utils::do_setup();
    let fake = FakeXero::new(vec![Uuid::new_v4()]);
    let base = test_utils::start(fake).await;
    let client = Client::new(&test_utils::config(&base), Arc::new(MemoryBackend::new()))?;

    let err = client
        .complete_authorization("stale-code".to_string(), None)
        .await
        .unwrap_err();

    assert!(err.requires_reauthorization());
    Ok(())
}
