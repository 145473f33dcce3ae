use crate::*;

use mailslot_services::ServerPhase;

/// After an orderly shutdown none of the channel's five objects remain.
#[tokio::test]
async fn test_shutdown_removes_channel_objects() -> Result<()> {
    let downloads = tempfile::tempdir()?;
    let store = memory_store();
    let server = spawn_server(store.clone());
    let client = discovered_client(store.clone(), downloads.path()).await?;
    client.send_command("run true").await?;

    let channel = server.channel.clone();
    let stopped = server.stop().await?;
    assert_eq!(stopped.phase(), ServerPhase::Stopped);

    let remaining = store.list(None).await?;
    for name in channel.all_object_names() {
        assert!(!remaining.contains(&name), "{name} survived shutdown");
    }
    Ok(())
}

/// Cleanup leaves other servers' channels alone.
#[tokio::test]
async fn test_shutdown_only_touches_own_channel() -> Result<()> {
    let store = memory_store();
    let keep = spawn_server(store.clone());
    let doomed = spawn_server(store.clone());

    // Wait until both markers are published.
    let cancel = CancellationToken::new();
    for channel in [&keep.channel, &doomed.channel] {
        let mut probe = Client::new(store.clone(), client_settings(Path::new(".")));
        tokio::time::timeout(
            std::time::Duration::from_secs(5),
            probe.discover(Some(channel), &cancel),
        )
        .await??;
    }

    doomed.stop().await?;
    let remaining = store.list(None).await?;
    assert_eq!(remaining, vec![format!("{}.server", keep.channel)]);

    keep.stop().await?;
    assert!(store.list(None).await?.is_empty());
    Ok(())
}

/// `terminate` answers the client, then the server cleans up and exits on
/// its own.
#[tokio::test]
async fn test_terminate_command_stops_server() -> Result<()> {
    let downloads = tempfile::tempdir()?;
    let store = memory_store();
    let server = spawn_server(store.clone());
    let client = discovered_client(store.clone(), downloads.path()).await?;

    let reply = client.send_command("terminate").await?;
    assert_eq!(reply.text, "Server terminating");

    let stopped = tokio::time::timeout(std::time::Duration::from_secs(5), server.task).await??;
    assert_eq!(stopped.phase(), ServerPhase::Stopped);
    assert!(store.list(None).await?.is_empty());
    Ok(())
}
