//! Client lifecycle: memoization, startup deadline, managed servers.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use boot_mcp::{
    ErrorData, Implementation, ManagedStart, ProtocolVersion, PublishedServer, RoleServer,
    ServerCapabilities, ServerHandler, ServerInfo,
};
use boot_runtime::{Broker, ClientManager, ClientOptions};
use boot_types::{Args, ClientIdentity, HandlerResult};
use rmcp::model::{ClientRequest, CustomRequest, CustomResult, ServerResult};
use rmcp::service::RequestContext;
use serde_json::{Value, json};

const HANDSHAKE: Duration = Duration::from_secs(5);

#[derive(Default)]
struct EchoServer {
    started_with: Arc<Mutex<Vec<Args>>>,
}

impl EchoServer {
    fn running() -> PublishedServer {
        PublishedServer::running(Self::default())
    }
}

impl ServerHandler for EchoServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "echo".to_string(),
                version: "1.2.3".to_string(),
                ..Default::default()
            },
            instructions: None,
        }
    }

    async fn on_custom_request(
        &self,
        request: CustomRequest,
        _context: RequestContext<RoleServer>,
    ) -> Result<CustomResult, ErrorData> {
        Ok(CustomResult::new(request.params.unwrap_or(Value::Null)))
    }
}

#[async_trait]
impl ManagedStart for EchoServer {
    async fn start(&self, args: &Args) -> HandlerResult<()> {
        self.started_with.lock().unwrap().push(args.clone());
        Ok(())
    }
}

fn options(name: &str) -> ClientOptions {
    ClientOptions::new(ClientIdentity::new(name, "1.0.0"))
}

fn args(value: Value) -> Args {
    value.as_object().cloned().unwrap_or_default()
}

#[tokio::test]
async fn same_name_shares_one_connection() {
    let broker = Arc::new(Broker::new());
    broker.set_server(EchoServer::running());
    let manager = ClientManager::new(Arc::clone(&broker), Duration::from_millis(100), HANDSHAKE);

    let a = Args::new();
    let (first, second) = tokio::join!(
        manager.get_client(&a, options("shared")),
        manager.get_client(&a, options("shared")),
    );
    let (first, second) = (first.unwrap(), second.unwrap());
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(manager.transports_opened(), 1);

    let later = manager.get_client(&a, options("shared")).await.unwrap();
    assert!(Arc::ptr_eq(&first, &later));
    assert_eq!(manager.transports_opened(), 1);

    let other = manager.get_client(&a, options("other")).await.unwrap();
    assert!(!Arc::ptr_eq(&first, &other));
    assert_eq!(manager.transports_opened(), 2);

    let echo = ClientRequest::CustomRequest(CustomRequest::new("echo", Some(json!({"n": 1}))));
    let echoed = other.client().request(echo, HANDSHAKE).await.unwrap();
    assert!(matches!(echoed, ServerResult::CustomResult(CustomResult(v)) if v == json!({"n": 1})));
    assert_eq!(first.server_info().unwrap().server_info.name, "echo");
    assert_eq!(first.client().identity().name, "shared");
}

#[tokio::test(start_paused = true)]
async fn missing_server_times_out_and_stays_failed() {
    let broker = Arc::new(Broker::new());
    let manager = ClientManager::new(Arc::clone(&broker), Duration::from_millis(1), HANDSHAKE);

    let err = match manager.get_client(&Args::new(), options("c")).await {
        Ok(_) => panic!("connected without a server"),
        Err(err) => err,
    };
    assert_eq!(err.code(), "server_start_timeout");
    assert!(err.is_timeout());
    assert_ne!(err.safe_message(), err.to_string());

    // Publishing afterwards does not revive the memoized failure.
    broker.set_server(EchoServer::running());
    let again = manager.get_client(&Args::new(), options("c")).await;
    assert_eq!(again.err().map(|e| e.code()), Some("server_start_timeout"));
    assert_eq!(manager.transports_opened(), 0);

    // A new name gets a fresh attempt.
    assert!(manager.get_client(&Args::new(), options("d")).await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn server_published_before_the_deadline_is_used() {
    let broker = Arc::new(Broker::new());
    let manager = ClientManager::new(Arc::clone(&broker), Duration::from_millis(100), HANDSHAKE);

    let publisher = {
        let broker = Arc::clone(&broker);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(40)).await;
            broker.set_server(EchoServer::running());
        })
    };
    let connection = manager.get_client(&Args::new(), options("late")).await;
    publisher.await.unwrap();
    assert!(connection.is_ok());
}

#[tokio::test]
async fn managed_server_is_started_with_args() {
    let started_with = Arc::new(Mutex::new(Vec::new()));
    let broker = Arc::new(Broker::new());
    broker.set_server(PublishedServer::managed(EchoServer {
        started_with: Arc::clone(&started_with),
    }));
    let manager = ClientManager::new(Arc::clone(&broker), Duration::from_millis(100), HANDSHAKE);

    let invocation = args(json!({"apiKey": "k"}));
    manager.get_client(&invocation, options("m")).await.unwrap();
    manager.get_client(&invocation, options("m")).await.unwrap();

    assert_eq!(*started_with.lock().unwrap(), vec![invocation.clone()]);
    assert_eq!(broker.args().try_get(), Some(invocation));
}

#[tokio::test]
async fn running_server_is_not_started() {
    let server = EchoServer::default();
    let started_with = Arc::clone(&server.started_with);
    let broker = Arc::new(Broker::new());
    broker.set_server(PublishedServer::running(server));
    let manager = ClientManager::new(Arc::clone(&broker), Duration::from_millis(100), HANDSHAKE);

    manager
        .get_client(&args(json!({"x": 1})), options("r"))
        .await
        .unwrap();
    assert!(started_with.lock().unwrap().is_empty());
}

struct Refuses;

impl ServerHandler for Refuses {}

#[async_trait]
impl ManagedStart for Refuses {
    async fn start(&self, _args: &Args) -> HandlerResult<()> {
        Err("no credentials".into())
    }
}

#[tokio::test]
async fn managed_start_failure_is_a_module_error() {
    let broker = Arc::new(Broker::new());
    broker.set_server(PublishedServer::managed(Refuses));
    let manager = ClientManager::new(Arc::clone(&broker), Duration::from_millis(100), HANDSHAKE);

    let err = match manager.get_client(&Args::new(), options("f")).await {
        Ok(_) => panic!("connected to a server that failed to start"),
        Err(err) => err,
    };
    assert_eq!(err.code(), "module_error");
    assert!(err.to_string().contains("no credentials"));
    assert_eq!(manager.transports_opened(), 0);
}
