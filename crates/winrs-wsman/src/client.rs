use base64::{Engine as _, engine::general_purpose::STANDARD};
use uuid::Uuid;
use winrs_core::{
    CommandHandle, CommandId, ConnectionConfig, Credentials, OutputChunk, ShellId, SignalCode,
};

use crate::{
    TransportError, WsmanError,
    envelope::{self, Envelope, Selector},
    response::{self, Identity, PullResponse},
    transport::{HttpReply, HttpRequest, Transport},
    xml::{self, Node},
};

const SERVICE_PATH: &str = "wsman";
const CONFIG_RESOURCE: &str = "config";

/// Typed WS-Management operations over one transport.
///
/// Every operation takes `&mut self`, so a client has at most one request in
/// flight.
pub struct WsmanClient<T> {
    transport: T,
    config: ConnectionConfig,
    authorization: String,
}

impl<T: Transport> WsmanClient<T> {
    pub fn new(transport: T, config: ConnectionConfig, credentials: &Credentials) -> Self {
        let token = STANDARD.encode(format!("{}:{}", credentials.username, credentials.secret()));
        Self {
            transport,
            config,
            authorization: format!("Basic {token}"),
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Creates a shell and returns its id.
    pub async fn create(&mut self) -> Result<ShellId, WsmanError> {
        let request = envelope::create(&self.config);
        let (root, body) = self.call(request).await?;
        let shell_id = response::shell_id(&root, &body)?;
        tracing::debug!(shell_id = %shell_id, "shell created");
        Ok(shell_id)
    }

    pub async fn delete(&mut self, shell_id: &ShellId) -> Result<(), WsmanError> {
        self.call(envelope::delete(shell_id)).await?;
        tracing::debug!(shell_id = %shell_id, "shell deleted");
        Ok(())
    }

    /// Starts `args[0]` with the remaining arguments in the shell.
    pub async fn command(
        &mut self,
        shell_id: &ShellId,
        args: &[String],
    ) -> Result<CommandId, WsmanError> {
        let (root, body) = self.call(envelope::command(shell_id, args)).await?;
        response::command_id(&root, &body)
    }

    pub async fn send(&mut self, handle: &CommandHandle, data: &str) -> Result<(), WsmanError> {
        self.call(envelope::send(handle, data)).await?;
        Ok(())
    }

    /// Fetches the output page numbered `sequence`.
    pub async fn receive(
        &mut self,
        handle: &CommandHandle,
        sequence: u64,
    ) -> Result<OutputChunk, WsmanError> {
        let (root, body) = self.call(envelope::receive(handle, sequence)).await?;
        response::receive(&root, &body, sequence)
    }

    pub async fn signal(
        &mut self,
        handle: &CommandHandle,
        code: SignalCode,
    ) -> Result<(), WsmanError> {
        self.call(envelope::signal(handle, code)).await?;
        Ok(())
    }

    /// Opens an enumeration and returns its context.
    pub async fn enumerate(
        &mut self,
        resource: &str,
        selector: Option<Selector>,
    ) -> Result<String, WsmanError> {
        let (root, body) = self.call(envelope::enumerate(resource, selector)).await?;
        response::enumeration_context(&root, &body)
    }

    pub async fn pull(&mut self, resource: &str, context: &str) -> Result<PullResponse, WsmanError> {
        let (root, body) = self.call(envelope::pull(resource, context)).await?;
        response::pull(&root, &body)
    }

    /// Fetches a resource and returns the body element.
    pub async fn get(
        &mut self,
        resource: &str,
        selector: Option<Selector>,
    ) -> Result<Node, WsmanError> {
        let (root, body) = self.call(envelope::get(resource, selector)).await?;
        response::body(&root, &body)
    }

    /// Reads the service configuration as nested JSON.
    pub async fn server_config(&mut self) -> Result<serde_json::Value, WsmanError> {
        let config = self.get(CONFIG_RESOURCE, None).await?;
        Ok(response::config_to_value(&config))
    }

    /// Asks the service who it is. Works without valid credentials.
    pub async fn identify(&mut self) -> Result<Identity, WsmanError> {
        let request = HttpRequest {
            path: SERVICE_PATH.to_string(),
            body: envelope::identify()?,
            headers: vec![("WSMANIDENTIFY".to_string(), "unauthenticated".to_string())],
        };
        let reply = self.transport.send(request).await?;
        let (root, body) = interpret(reply)?;
        response::identity(&root, &body)
    }

    async fn call(&mut self, request: Envelope) -> Result<(Node, String), WsmanError> {
        let message_id = format!("uuid:{}", Uuid::new_v4());
        let document = request.render(&self.config, &message_id)?;
        tracing::debug!(
            action = request.action.as_str(),
            resource = %request.resource,
            message_id = %message_id,
            "sending request"
        );

        let reply = self
            .transport
            .send(HttpRequest {
                path: SERVICE_PATH.to_string(),
                body: document,
                headers: vec![("Authorization".to_string(), self.authorization.clone())],
            })
            .await?;

        interpret(reply).inspect_err(|err| {
            tracing::debug!(action = request.action.as_str(), error = %err, "request failed");
        })
    }
}

/// Maps an HTTP reply to a parsed document or a typed failure.
fn interpret(reply: HttpReply) -> Result<(Node, String), WsmanError> {
    if !reply.is_success() {
        tracing::warn!(status = reply.status, "request returned an error status");
    }
    match reply.status {
        401 => {
            tracing::warn!(challenge = ?reply.www_authenticate, "authentication rejected");
            Err(WsmanError::Authentication {
                challenge: reply.www_authenticate,
            })
        }
        500 => {
            let root = xml::parse(&reply.body)
                .map_err(|err| WsmanError::malformed(format!("error reply: {err}"), &reply.body))?;
            Err(WsmanError::Fault(response::fault(&root, &reply.body)?))
        }
        status if !reply.is_success() => Err(TransportError::Http {
            status,
            body: reply.body,
        }
        .into()),
        _ => {
            let root = xml::parse(&reply.body)?;
            Ok((root, reply.body))
        }
    }
}
