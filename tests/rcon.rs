mod common;

use std::sync::Arc;

use gamequery::{rcon::RconClient, Error};

#[tokio::test]
async fn authenticate_then_execute() {
    let server = common::rcon_server("hunter2").await;
    let client = RconClient::new();

    assert!(client.authenticate(server.address, "hunter2").await.unwrap());
    assert!(client.is_authenticated(server.address));

    let output = client.execute(server.address, "echo hi").await.unwrap();
    assert_eq!(output, "hi");
    let output = client.execute(server.address, "status").await.unwrap();
    assert_eq!(output, "Unknown command \"status\"");

    client.close().await;
}

#[tokio::test]
async fn wrong_password_is_reported_as_false() {
    let server = common::rcon_server("hunter2").await;
    let client = RconClient::new();

    assert!(!client.authenticate(server.address, "letmein").await.unwrap());
    assert!(!client.is_authenticated(server.address));
    assert!(matches!(
        client.execute(server.address, "echo hi").await,
        Err(Error::NotAuthenticated(_))
    ));

    client.close().await;
}

#[tokio::test]
async fn concurrent_commands_each_get_their_own_reply() {
    let server = common::rcon_server("hunter2").await;
    let client = Arc::new(RconClient::new());
    assert!(client.authenticate(server.address, "hunter2").await.unwrap());

    let mut tasks = tokio::task::JoinSet::new();
    for n in 0..5 {
        let client = Arc::clone(&client);
        let address = server.address;
        tasks.spawn(async move {
            let output = client.execute(address, &format!("echo {}", n)).await;
            (n, output)
        });
    }

    while let Some(joined) = tasks.join_next().await {
        let (n, output) = joined.unwrap();
        assert_eq!(output.unwrap(), n.to_string());
    }

    client.close().await;
}

#[tokio::test]
async fn unreachable_server_fails_the_request() {
    let address = common::closed_port().await;
    let client = RconClient::new();

    assert!(matches!(
        client.authenticate(address, "hunter2").await,
        Err(Error::UnreachableHost(_))
    ));

    client.close().await;
}
