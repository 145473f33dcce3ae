use crate::*;

use mailslot_core::envelope::{decode_payload, encode_payload};
use mailslot_core::{Envelope, Origin, Slot, Stamp};
use mailslot_services::{Stream, TickOutcome};

fn command(stamp: Stamp, text: &str) -> String {
    Envelope::new(Origin::Client, stamp, text).encode()
}

async fn reply_text(store: &ObjectStore, channel: &ChannelId) -> Result<Option<String>> {
    let Some(raw) = store.get_text(&channel.object_name(Slot::Out)).await? else {
        return Ok(None);
    };
    let env = Envelope::parse(&raw)?;
    Ok(Some(String::from_utf8(decode_payload(&env.body)?)?))
}

/// Seeing the same command object twice executes it once.
#[tokio::test]
async fn test_duplicate_delivery_is_rejected() -> Result<()> {
    let work = tempfile::tempdir()?;
    let counter = work.path().join("count");
    let store = memory_store();
    let mut server = Server::new(store.clone(), server_settings());
    server.start().await?;
    let inbox = server.channel().object_name(Slot::In);

    let envelope = command(Stamp::now(), &format!("run echo x >> {}", counter.display()));
    store.put(&inbox, envelope.clone()).await?;
    assert_eq!(server.tick().await.command, TickOutcome::Handled);
    store.delete(&server.channel().object_name(Slot::Out)).await?;

    // The store surfaces the same object again.
    store.put(&inbox, envelope).await?;
    assert_eq!(server.tick().await.command, TickOutcome::Stale);

    assert_eq!(std::fs::read_to_string(&counter)?, "x\n");
    assert_eq!(reply_text(&store, server.channel()).await?, None);
    assert_eq!(store.get(&inbox).await?, None);
    Ok(())
}

/// Dedup is per command kind: a different `run` stamped before the last
/// completed `run` is dropped without side effects.
#[tokio::test]
async fn test_older_command_of_same_kind_is_dropped() -> Result<()> {
    let work = tempfile::tempdir()?;
    let marker = work.path().join("touched");
    let store = memory_store();
    let mut server = Server::new(store.clone(), server_settings());
    let inbox = server.channel().object_name(Slot::In);

    let earlier = Stamp::now();
    store.put(&inbox, command(earlier.succ(), "run true")).await?;
    assert_eq!(server.tick().await.command, TickOutcome::Handled);
    let bookmark = server
        .state()
        .bookmark(&Stream::for_command("run"))
        .context("bookmark recorded")?;
    assert!(bookmark > earlier);

    store
        .put(&inbox, command(earlier, &format!("run touch {}", marker.display())))
        .await?;
    assert_eq!(server.tick().await.command, TickOutcome::Stale);
    assert!(!marker.exists());

    // A different kind with the same early stamp is unaffected.
    store.put(&inbox, command(earlier, "whoami")).await?;
    assert_eq!(server.tick().await.command, TickOutcome::Handled);
    Ok(())
}

/// Two commands written before the server's first poll: the store keeps only
/// the last write to `<id>.in`, so only that one is ever seen.
#[tokio::test]
async fn test_overwritten_command_is_lost_at_store_level() -> Result<()> {
    let store = memory_store();
    let mut server = Server::new(store.clone(), server_settings());
    let inbox = server.channel().object_name(Slot::In);

    let t1 = Stamp::now();
    store.put(&inbox, command(t1, "run echo A")).await?;
    store.put(&inbox, command(t1.succ(), "run echo B")).await?;

    assert_eq!(server.tick().await.command, TickOutcome::Handled);
    assert_eq!(reply_text(&store, server.channel()).await?.as_deref(), Some("B\n"));
    assert_eq!(server.tick().await.command, TickOutcome::Idle);
    Ok(())
}

/// A response left over from an earlier round is never mistaken for the
/// answer to a new request.
#[tokio::test]
async fn test_client_ignores_leftover_response() -> Result<()> {
    let downloads = tempfile::tempdir()?;
    let store = memory_store();
    let server = spawn_server(store.clone());
    let client = discovered_client(store.clone(), downloads.path()).await?;

    let leftover = Envelope::new(Origin::Server, Stamp::now(), encode_payload(b"stale answer"));
    store
        .put(&server.channel.object_name(Slot::Out), leftover.encode())
        .await?;

    let reply = client.send_command("run echo fresh").await?;
    assert_eq!(reply.text, "fresh\n");
    assert!(reply.stamp > leftover.stamp);

    server.stop().await?;
    Ok(())
}

/// Garbage sitting in the response slot is skipped; the client keeps polling
/// until the server overwrites it with a real reply.
#[tokio::test]
async fn test_client_skips_malformed_response() -> Result<()> {
    let downloads = tempfile::tempdir()?;
    let store = memory_store();
    let server = spawn_server(store.clone());
    let client = discovered_client(store.clone(), downloads.path()).await?;

    store
        .put(&server.channel.object_name(Slot::Out), "not an envelope")
        .await?;

    let before = Stamp::now();
    let reply = client.send_command("run echo parsed").await?;
    assert_eq!(reply.text, "parsed\n");
    assert!(reply.stamp > before);

    server.stop().await?;
    Ok(())
}

/// A write status left over from an earlier transfer is not taken as the
/// answer to a new write.
#[tokio::test]
async fn test_client_ignores_leftover_write_status() -> Result<()> {
    let local_dir = tempfile::tempdir()?;
    let remote_dir = tempfile::tempdir()?;
    let local = local_dir.path().join("upload.txt");
    std::fs::write(&local, b"second transfer")?;
    let target = remote_dir.path().join("landed.txt");

    let store = memory_store();
    let server = spawn_server(store.clone());
    let client = discovered_client(store.clone(), local_dir.path()).await?;

    let leftover = Envelope::new(
        Origin::Server,
        Stamp::now(),
        "Write successful: /somewhere/else.txt",
    );
    store
        .put(&server.channel.object_name(Slot::WriteStatus), leftover.encode())
        .await?;

    let status = client
        .write_file(&local, &target.display().to_string())
        .await?;
    assert!(status.succeeded, "status: {}", status.message);
    assert!(status.stamp > leftover.stamp);
    assert_eq!(status.message, format!("Write successful: {}", target.display()));
    assert_eq!(std::fs::read(&target)?, b"second transfer");

    server.stop().await?;
    Ok(())
}
