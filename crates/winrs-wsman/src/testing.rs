//! A scripted in-memory transport for exercising clients without a server.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;

use crate::{
    TransportError,
    transport::{HttpReply, HttpRequest, Transport},
};

#[derive(Debug)]
enum Step {
    Reply(Result<HttpReply, TransportError>),
    /// Never answers, like a server that hangs.
    Stall,
}

/// Replays queued replies in order and records every request it was given.
///
/// Clones share the same queue and log, so a test can keep one clone for
/// inspection after handing the other to a client.
#[derive(Debug, Clone, Default)]
pub struct ScriptedTransport {
    replies: Arc<Mutex<VecDeque<Step>>>,
    sent: Arc<Mutex<Vec<HttpRequest>>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a 200 reply with the given body.
    pub fn reply_ok(&self, body: impl Into<String>) -> &Self {
        self.reply(HttpReply::ok(body))
    }

    /// Queues a 500 reply carrying a SOAP fault document.
    pub fn reply_fault(&self, body: impl Into<String>) -> &Self {
        self.reply(HttpReply {
            status: 500,
            body: body.into(),
            www_authenticate: None,
        })
    }

    pub fn reply(&self, reply: HttpReply) -> &Self {
        self.push(Step::Reply(Ok(reply)))
    }

    pub fn fail(&self, err: TransportError) -> &Self {
        self.push(Step::Reply(Err(err)))
    }

    /// Queues a request that never gets an answer.
    pub fn stall(&self) -> &Self {
        self.push(Step::Stall)
    }

    fn push(&self, step: Step) -> &Self {
        if let Ok(mut replies) = self.replies.lock() {
            replies.push_back(step);
        }
        self
    }

    /// Every request sent so far, oldest first.
    pub fn sent(&self) -> Vec<HttpRequest> {
        self.sent
            .lock()
            .map(|sent| sent.clone())
            .unwrap_or_default()
    }

    /// Request bodies sent so far.
    pub fn bodies(&self) -> Vec<String> {
        self.sent().into_iter().map(|request| request.body).collect()
    }

    /// Number of queued replies not yet consumed.
    pub fn remaining(&self) -> usize {
        self.replies.lock().map(|replies| replies.len()).unwrap_or(0)
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&mut self, request: HttpRequest) -> Result<HttpReply, TransportError> {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(request);
        }
        let step = self
            .replies
            .lock()
            .ok()
            .and_then(|mut replies| replies.pop_front());
        match step {
            Some(Step::Reply(reply)) => reply,
            Some(Step::Stall) => std::future::pending().await,
            None => Err(TransportError::Request(
                "scripted transport has no reply queued".to_string(),
            )),
        }
    }
}

/// Canned reply documents in the shape a Windows server sends them.
pub mod replies {
    use base64::{Engine as _, engine::general_purpose::STANDARD};

    const ENVELOPE_OPEN: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope" xmlns:a="http://schemas.xmlsoap.org/ws/2004/08/addressing" xmlns:w="http://schemas.dmtf.org/wbem/wsman/1/wsman.xsd" xmlns:rsp="http://schemas.microsoft.com/wbem/wsman/1/windows/shell" xmlns:n="http://schemas.xmlsoap.org/ws/2004/09/enumeration" xmlns:x="http://schemas.xmlsoap.org/ws/2004/09/transfer">"#;
    const ENVELOPE_CLOSE: &str = "</s:Envelope>";

    fn envelope(body: &str) -> String {
        format!("{ENVELOPE_OPEN}<s:Header/><s:Body>{body}</s:Body>{ENVELOPE_CLOSE}")
    }

    pub fn created(shell_id: &str) -> String {
        envelope(&format!(
            r#"<x:ResourceCreated><a:Address>https://server:5986/wsman</a:Address><a:ReferenceParameters><w:ResourceURI>http://schemas.microsoft.com/wbem/wsman/1/windows/shell/cmd</w:ResourceURI><w:SelectorSet><w:Selector Name="ShellId">{shell_id}</w:Selector></w:SelectorSet></a:ReferenceParameters></x:ResourceCreated>"#
        ))
    }

    pub fn command(command_id: &str) -> String {
        envelope(&format!(
            "<rsp:CommandResponse><rsp:CommandId>{command_id}</rsp:CommandId></rsp:CommandResponse>"
        ))
    }

    /// An empty success reply, as sent for delete, send and signal.
    pub fn empty() -> String {
        envelope("")
    }

    /// A receive reply. `exit_code` marks the command as done.
    pub fn output(command_id: &str, stdout: &str, stderr: &str, exit_code: Option<i64>) -> String {
        let mut streams = String::new();
        for (name, text) in [("stdout", stdout), ("stderr", stderr)] {
            if !text.is_empty() {
                streams.push_str(&format!(
                    r#"<rsp:Stream Name="{name}" CommandId="{command_id}">{}</rsp:Stream>"#,
                    STANDARD.encode(text)
                ));
            }
        }
        let state = match exit_code {
            Some(code) => format!(
                r#"<rsp:CommandState CommandId="{command_id}" State="http://schemas.microsoft.com/wbem/wsman/1/windows/shell/CommandState/Done"><rsp:ExitCode>{code}</rsp:ExitCode></rsp:CommandState>"#
            ),
            None => format!(
                r#"<rsp:CommandState CommandId="{command_id}" State="http://schemas.microsoft.com/wbem/wsman/1/windows/shell/CommandState/Running"/>"#
            ),
        };
        envelope(&format!(
            "<rsp:ReceiveResponse>{streams}{state}</rsp:ReceiveResponse>"
        ))
    }

    /// A fault with a primary code, one subcode and a reason.
    pub fn fault(subcode: &str, reason: &str) -> String {
        format!(
            r#"{ENVELOPE_OPEN}<s:Header/><s:Body><s:Fault><s:Code><s:Value>s:Receiver</s:Value><s:Subcode><s:Value>w:{subcode}</s:Value></s:Subcode></s:Code><s:Reason><s:Text xml:lang="en-US">{reason}</s:Text></s:Reason><s:Detail><f:WSManFault xmlns:f="http://schemas.microsoft.com/wbem/wsman/1/wsmanfault" Code="2150858793" Machine="server"><f:Message>{reason}</f:Message></f:WSManFault></s:Detail></s:Fault></s:Body>{ENVELOPE_CLOSE}"#
        )
    }

    /// The fault a receive returns when no output arrived within the
    /// operation timeout.
    pub fn timed_out() -> String {
        fault(
            "TimedOut",
            "The WS-Management service cannot complete the operation within the time specified in OperationTimeout.",
        )
    }

    pub fn enumerate(context: &str) -> String {
        envelope(&format!(
            "<n:EnumerateResponse><n:EnumerationContext>{context}</n:EnumerationContext></n:EnumerateResponse>"
        ))
    }

    /// A final pull page listing the given shell ids.
    pub fn shells(ids: &[&str]) -> String {
        let items: String = ids
            .iter()
            .map(|id| format!("<rsp:Shell><rsp:ShellId>{id}</rsp:ShellId><rsp:State>Connected</rsp:State></rsp:Shell>"))
            .collect();
        envelope(&format!(
            "<n:PullResponse><n:Items>{items}</n:Items><n:EndOfSequence/></n:PullResponse>"
        ))
    }
}
