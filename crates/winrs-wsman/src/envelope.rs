//! SOAP envelope construction for WS-Management requests.

use std::time::Duration;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use winrs_core::{CommandHandle, ConnectionConfig, ShellId, SignalCode};

use crate::{WsmanError, xml::Node};

pub const NS_CONFIG: &str = "http://schemas.microsoft.com/wbem/wsman/1/config";
pub const NS_SHELL: &str = "http://schemas.microsoft.com/wbem/wsman/1/windows/shell";
pub const NS_SOAP: &str = "http://www.w3.org/2003/05/soap-envelope";
pub const NS_ADDRESSING: &str = "http://schemas.xmlsoap.org/ws/2004/08/addressing";
pub const NS_WSMAN: &str = "http://schemas.dmtf.org/wbem/wsman/1/wsman.xsd";
pub const NS_ENUMERATION: &str = "http://schemas.xmlsoap.org/ws/2004/09/enumeration";
pub const NS_IDENTITY: &str = "http://schemas.dmtf.org/wbem/wsman/identity/1/wsmanidentity.xsd";
pub const NS_XML: &str = "http://www.w3.org/XML/1998/namespace";
pub const NS_WSMAN_FAULT: &str = "http://schemas.microsoft.com/wbem/wsman/1/wsmanfault";

/// Prefix to namespace table declared on every envelope.
pub const NAMESPACES: [(&str, &str); 8] = [
    ("cfg", NS_CONFIG),
    ("rsp", NS_SHELL),
    ("s", NS_SOAP),
    ("wsa", NS_ADDRESSING),
    ("wsman", NS_WSMAN),
    ("wsen", NS_ENUMERATION),
    ("wsmid", NS_IDENTITY),
    ("xml", NS_XML),
];

const RESOURCE_PREFIX: &str = "http://schemas.microsoft.com/wbem/wsman/1/";
const ANONYMOUS_ADDRESS: &str = "http://schemas.xmlsoap.org/ws/2004/08/addressing/role/anonymous";
const SIGNAL_PREFIX: &str = "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/signal/";

/// Default resource: a plain `cmd` shell.
pub const SHELL_RESOURCE: &str = "windows/shell/cmd";

/// The operations this client knows how to request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Command,
    Create,
    Delete,
    Enumerate,
    Get,
    Pull,
    Receive,
    Send,
    Signal,
}

impl Action {
    pub fn uri(self) -> &'static str {
        match self {
            Action::Command => "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/Command",
            Action::Create => "http://schemas.xmlsoap.org/ws/2004/09/transfer/Create",
            Action::Delete => "http://schemas.xmlsoap.org/ws/2004/09/transfer/Delete",
            Action::Enumerate => "http://schemas.xmlsoap.org/ws/2004/09/enumeration/Enumerate",
            Action::Get => "http://schemas.xmlsoap.org/ws/2004/09/transfer/Get",
            Action::Pull => "http://schemas.xmlsoap.org/ws/2004/09/enumeration/Pull",
            Action::Receive => "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/Receive",
            Action::Send => "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/Send",
            Action::Signal => "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/Signal",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Action::Command => "command",
            Action::Create => "create",
            Action::Delete => "delete",
            Action::Enumerate => "enumerate",
            Action::Get => "get",
            Action::Pull => "pull",
            Action::Receive => "receive",
            Action::Send => "send",
            Action::Signal => "signal",
        }
    }
}

/// A `wsman:Selector` entry, e.g. `Name="ShellId"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    pub name: String,
    pub value: String,
}

impl Selector {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn shell(shell_id: &ShellId) -> Self {
        Self::new("ShellId", shell_id.0.clone())
    }
}

/// Expands a relative resource against the Microsoft WS-Management prefix.
pub fn resource_uri(resource: &str) -> String {
    if resource.starts_with("http") {
        resource.to_string()
    } else {
        format!("{RESOURCE_PREFIX}{resource}")
    }
}

/// XML Schema duration with fractional seconds, e.g. `PT300.000S`.
pub fn xml_duration(duration: Duration) -> String {
    format!("PT{:.3}S", duration.as_secs_f64())
}

/// One request: the action plus everything that varies per call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub action: Action,
    pub resource: String,
    pub selectors: Vec<Selector>,
    pub options: Vec<(String, String)>,
    pub body: Option<Node>,
}

impl Envelope {
    pub fn new(action: Action) -> Self {
        Self {
            action,
            resource: SHELL_RESOURCE.to_string(),
            selectors: Vec::new(),
            options: Vec::new(),
            body: None,
        }
    }

    pub fn resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = resource.into();
        self
    }

    pub fn selector(mut self, selector: Selector) -> Self {
        self.selectors.push(selector);
        self
    }

    pub fn option(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, content: Node) -> Self {
        self.body = Some(content);
        self
    }

    /// Builds the `s:Header` element.
    pub fn header(&self, config: &ConnectionConfig, message_id: &str) -> Node {
        let must_understand = |node: Node| node.with_attr("s:mustUnderstand", "true");

        let mut header = Node::new("s:Header")
            .with_child(Node::new("wsa:To").with_text(config.url("wsman")))
            .with_child(
                Node::new("wsa:ReplyTo").with_child(must_understand(
                    Node::new("wsa:Address").with_text(ANONYMOUS_ADDRESS),
                )),
            )
            .with_child(must_understand(
                Node::new("wsman:ResourceURI").with_text(resource_uri(&self.resource)),
            ))
            .with_child(must_understand(
                Node::new("wsa:Action").with_text(self.action.uri()),
            ))
            .with_child(must_understand(
                Node::new("wsman:MaxEnvelopeSize").with_text(config.max_envelope_size.to_string()),
            ))
            .with_child(Node::new("wsa:MessageID").with_text(message_id))
            .with_child(
                Node::new("wsman:Locale")
                    .with_attr("xml:lang", config.locale.as_str())
                    .with_attr("s:mustUnderstand", "false"),
            )
            .with_child(
                Node::new("wsman:OperationTimeout")
                    .with_text(xml_duration(config.request_timeout())),
            );

        if !self.selectors.is_empty() {
            let mut set = Node::new("wsman:SelectorSet");
            for selector in &self.selectors {
                set.push(
                    Node::new("wsman:Selector")
                        .with_attr("Name", selector.name.as_str())
                        .with_text(selector.value.as_str()),
                );
            }
            header.push(set);
        }

        if !self.options.is_empty() {
            let mut set = Node::new("wsman:OptionSet");
            for (name, value) in &self.options {
                set.push(
                    Node::new("wsman:Option")
                        .with_attr("Name", name.as_str())
                        .with_text(value.as_str()),
                );
            }
            header.push(set);
        }

        header
    }

    /// Renders the full document sent on the wire.
    pub fn render(&self, config: &ConnectionConfig, message_id: &str) -> Result<String, WsmanError> {
        let body = self.body.clone().map_or_else(
            || Node::new("s:Body"),
            |content| Node::new("s:Body").with_child(content),
        );
        envelope_node(self.header(config, message_id), body).to_document()
    }
}

/// Wraps header and body in an `s:Envelope` declaring the namespace table.
pub fn envelope_node(header: Node, body: Node) -> Node {
    let mut envelope = Node::new("s:Envelope");
    for (prefix, uri) in NAMESPACES {
        envelope = envelope.with_attr(format!("xmlns:{prefix}"), uri);
    }
    envelope.with_child(header).with_child(body)
}

/// `wst:Create` for a new shell.
pub fn create(config: &ConnectionConfig) -> Envelope {
    Envelope::new(Action::Create)
        .option("WINRS_NOPROFILE", "TRUE")
        .option("WINRS_CODEPAGE", config.codepage.to_string())
        .body(
            Node::new("rsp:Shell")
                .with_child(
                    Node::new("rsp:Lifetime").with_text(xml_duration(config.shell_lifetime())),
                )
                .with_child(Node::new("rsp:InputStreams").with_text("stdin"))
                .with_child(Node::new("rsp:OutputStreams").with_text("stdout stderr")),
        )
}

/// `wst:Delete` for an existing shell.
pub fn delete(shell_id: &ShellId) -> Envelope {
    Envelope::new(Action::Delete).selector(Selector::shell(shell_id))
}

/// Starts a command. The first argument is the command; an empty slice sends
/// a blank command, which the server accepts.
pub fn command(shell_id: &ShellId, args: &[String]) -> Envelope {
    let mut line = Node::new("rsp:CommandLine");
    let (first, rest) = args.split_first().map_or(("", &[][..]), |(first, rest)| {
        (first.as_str(), rest)
    });
    line.push(Node::new("rsp:Command").with_text(first));
    for arg in rest {
        line.push(Node::new("rsp:Arguments").with_text(arg.as_str()));
    }

    Envelope::new(Action::Command)
        .selector(Selector::shell(shell_id))
        .option("WINRS_CONSOLEMODE_STDIN", "TRUE")
        .option("WINRS_SKIP_CMD_SHELL", "TRUE")
        .body(line)
}

/// Feeds stdin to a running command. Line endings become `\r\n` and the data
/// always ends with one, which is how the remote console sees "Enter".
pub fn send(handle: &CommandHandle, data: &str) -> Envelope {
    let mut input = data.replace('\n', "\r\n");
    if !input.ends_with('\n') {
        input.push_str("\r\n");
    }

    Envelope::new(Action::Send)
        .selector(Selector::shell(&handle.shell_id))
        .body(
            Node::new("rsp:Send").with_child(
                Node::new("rsp:Stream")
                    .with_attr("Name", "stdin")
                    .with_attr("CommandId", handle.command_id.0.as_str())
                    .with_attr("End", "TRUE")
                    .with_text(STANDARD.encode(input.as_bytes())),
            ),
        )
}

/// Asks for one page of a command's output.
pub fn receive(handle: &CommandHandle, sequence: u64) -> Envelope {
    Envelope::new(Action::Receive)
        .selector(Selector::shell(&handle.shell_id))
        .body(
            Node::new("rsp:Receive")
                .with_attr("SequenceId", sequence.to_string())
                .with_child(
                    Node::new("rsp:DesiredStream")
                        .with_attr("CommandId", handle.command_id.0.as_str())
                        .with_text("stdout stderr"),
                ),
        )
}

pub fn signal(handle: &CommandHandle, code: SignalCode) -> Envelope {
    Envelope::new(Action::Signal)
        .selector(Selector::shell(&handle.shell_id))
        .body(
            Node::new("rsp:Signal")
                .with_attr("CommandId", handle.command_id.0.as_str())
                .with_child(
                    Node::new("rsp:Code").with_text(format!("{SIGNAL_PREFIX}{}", code.as_str())),
                ),
        )
}

pub fn enumerate(resource: &str, selector: Option<Selector>) -> Envelope {
    let envelope = Envelope::new(Action::Enumerate)
        .resource(resource)
        .body(Node::new("wsen:Enumerate"));
    match selector {
        Some(selector) => envelope.selector(selector),
        None => envelope,
    }
}

pub fn pull(resource: &str, context: &str) -> Envelope {
    Envelope::new(Action::Pull).resource(resource).body(
        Node::new("wsen:Pull")
            .with_child(Node::new("wsen:EnumerationContext").with_text(context)),
    )
}

pub fn get(resource: &str, selector: Option<Selector>) -> Envelope {
    let envelope = Envelope::new(Action::Get).resource(resource);
    match selector {
        Some(selector) => envelope.selector(selector),
        None => envelope,
    }
}

/// The anonymous `wsmid:Identify` document; it carries no addressing header.
pub fn identify() -> Result<String, WsmanError> {
    envelope_node(
        Node::new("s:Header"),
        Node::new("s:Body").with_child(Node::new("wsmid:Identify")),
    )
    .to_document()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{resource_uri, xml_duration};

    #[test]
    fn relative_resources_get_the_microsoft_prefix() {
        assert_eq!(
            resource_uri("windows/shell/cmd"),
            "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/cmd"
        );
        assert_eq!(
            resource_uri("http://schemas.microsoft.com/wbem/wsman/1/config/plugin"),
            "http://schemas.microsoft.com/wbem/wsman/1/config/plugin"
        );
    }

    #[test]
    fn durations_render_with_millisecond_precision() {
        assert_eq!(xml_duration(Duration::from_secs(300)), "PT300.000S");
        assert_eq!(xml_duration(Duration::from_millis(1500)), "PT1.500S");
    }
}
