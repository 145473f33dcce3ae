use crate::*;

use mailslot_core::{Envelope, Origin, Slot, Stamp, WriteRequest};
use mailslot_services::TickOutcome;

/// When publishing the reply fails, the reply is parked and re-sent on the
/// next tick; the command itself runs once.
#[tokio::test]
async fn test_failed_reply_is_resent_without_rerunning() -> Result<()> {
    let work = tempfile::tempdir()?;
    let counter = work.path().join("runs");
    let backend = Arc::new(FlakyBackend::new(".out", 2));
    let store = ObjectStore::new(backend.clone());
    let mut server = Server::new(store.clone(), server_settings());
    let inbox = server.channel().object_name(Slot::In);

    let text = format!("run echo ran >> {}; echo done", counter.display());
    store
        .put(&inbox, Envelope::new(Origin::Client, Stamp::now(), text).encode())
        .await?;

    assert_eq!(server.tick().await.command, TickOutcome::Retrying);
    assert!(store.get(&inbox).await?.is_some(), "input kept for retry");
    assert_eq!(server.tick().await.command, TickOutcome::Retrying);
    assert_eq!(server.tick().await.command, TickOutcome::Handled);

    assert_eq!(std::fs::read_to_string(&counter)?, "ran\n");
    assert_eq!(store.get(&inbox).await?, None);
    assert!(store.get(&server.channel().object_name(Slot::Out)).await?.is_some());
    Ok(())
}

/// A write status that cannot be published is not parked: the file is
/// written, the request consumed, and a replay of it stays rejected.
#[tokio::test]
async fn test_lost_write_status_still_consumes_request() -> Result<()> {
    let remote = tempfile::tempdir()?;
    let target = remote.path().join("kept.txt");
    let backend = Arc::new(FlakyBackend::new(".write_status", 1));
    let store = ObjectStore::new(backend);
    let mut server = Server::new(store.clone(), server_settings());
    let request_name = server.channel().object_name(Slot::Write);

    let request = WriteRequest {
        origin: Origin::Client,
        stamp: Stamp::now(),
        path: target.display().to_string(),
        content: b"payload".to_vec(),
    };
    store.put(&request_name, request.encode()).await?;

    assert_eq!(server.tick().await.write, TickOutcome::Handled);
    assert_eq!(std::fs::read(&target)?, b"payload");
    assert_eq!(store.get(&request_name).await?, None);
    assert_eq!(
        store.get(&server.channel().object_name(Slot::WriteStatus)).await?,
        None
    );

    store.put(&request_name, request.encode()).await?;
    assert_eq!(server.tick().await.write, TickOutcome::Stale);
    Ok(())
}

/// Transient failures publishing the server's reply do not end the
/// client's round-trip.
#[tokio::test]
async fn test_client_survives_transient_publish_failures_on_server() -> Result<()> {
    let downloads = tempfile::tempdir()?;
    let backend = Arc::new(FlakyBackend::new(".out", 3));
    let store = ObjectStore::new(backend);
    let server = spawn_server(store.clone());
    let client = discovered_client(store.clone(), downloads.path()).await?;

    let reply = client.send_command("run echo eventually").await?;
    assert_eq!(reply.text, "eventually\n");

    server.stop().await?;
    Ok(())
}

/// A read of the response slot that fails is retried on the client's next
/// poll instead of ending the round-trip.
#[tokio::test]
async fn test_client_retries_failed_response_poll() -> Result<()> {
    let downloads = tempfile::tempdir()?;
    let backend = Arc::new(FlakyBackend::failing_fetch(".out", 3));
    let store = ObjectStore::new(backend.clone());
    let server = spawn_server(store.clone());
    let client = discovered_client(store.clone(), downloads.path()).await?;

    let reply = client.send_command("run echo after retries").await?;
    assert_eq!(reply.text, "after retries\n");
    assert_eq!(backend.fetch_failures.load(Ordering::SeqCst), 0);

    server.stop().await?;
    Ok(())
}

/// The readiness marker is retried until the store accepts it.
#[tokio::test]
async fn test_marker_publish_is_retried() -> Result<()> {
    let downloads = tempfile::tempdir()?;
    let backend = Arc::new(FlakyBackend::new(".server", 2));
    let store = ObjectStore::new(backend);
    let server = spawn_server(store.clone());

    let client = discovered_client(store.clone(), downloads.path()).await?;
    assert_eq!(client.channel(), Some(&server.channel));

    server.stop().await?;
    Ok(())
}

/// A client waiting on a dead channel gives up after its response window.
#[tokio::test]
async fn test_client_times_out_without_server() -> Result<()> {
    let downloads = tempfile::tempdir()?;
    let mut settings = client_settings(downloads.path());
    settings.response_timeout_secs = 1;
    let mut client = Client::new(memory_store(), settings);
    client.attach(ChannelId::mint());

    let err = client.send_command("run echo nobody").await.unwrap_err();
    assert!(matches!(err, mailslot_services::ClientError::Timeout { .. }));
    Ok(())
}
