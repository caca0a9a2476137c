//! Readers for the reply documents of each operation.

use std::collections::BTreeMap;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};
use winrs_core::{
    CommandId, CommandState, Fault, OutputChunk, STDERR, STDOUT, ShellId, WsmanFaultDetail,
};

use crate::{
    WsmanError,
    envelope::{NS_ENUMERATION, NS_IDENTITY, NS_SHELL, NS_SOAP, NS_WSMAN, NS_WSMAN_FAULT},
    xml::Node,
};

const BYTE_ORDER_MARK: char = '\u{feff}';

/// Reply to an anonymous identify request.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Identity {
    pub protocol_version: String,
    pub product_vendor: String,
    pub product_version: String,
}

/// One page of an enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullResponse {
    /// Elements inside `wsen:Items`.
    pub items: Vec<Node>,
    /// Context for the next pull, when the server sent one.
    pub context: Option<String>,
    pub end_of_sequence: bool,
}

/// Reads the `s:Fault` out of an error reply.
pub fn fault(root: &Node, body: &str) -> Result<Fault, WsmanError> {
    let fault = root
        .find(NS_SOAP, "Fault")
        .ok_or_else(|| WsmanError::malformed("error reply carries no s:Fault", body))?;

    let codes = fault
        .child(NS_SOAP, "Code")
        .map(|code| {
            code.find_all(NS_SOAP, "Value")
                .into_iter()
                .map(|value| value.text.trim().to_string())
                .collect()
        })
        .unwrap_or_default();

    let reasons = fault
        .child(NS_SOAP, "Reason")
        .map(|reason| {
            reason
                .find_all(NS_SOAP, "Text")
                .into_iter()
                .map(|text| text.text.trim().to_string())
                .collect()
        })
        .unwrap_or_default();

    let details = fault
        .find_all(NS_SOAP, "Detail")
        .into_iter()
        .map(Node::to_xml)
        .collect::<Result<Vec<_>, _>>()?;

    let wsman = fault
        .find(NS_WSMAN_FAULT, "WSManFault")
        .map(|detail| WsmanFaultDetail {
            code: detail.attr("Code").and_then(|code| code.trim().parse().ok()),
            machine: detail.attr("Machine").map(str::to_string),
            message: detail
                .find(NS_WSMAN_FAULT, "Message")
                .map(|message| message.text_content().trim().to_string()),
        });

    Ok(Fault {
        codes,
        reasons,
        details,
        wsman,
    })
}

/// Shell id from a create reply's `wsman:Selector Name="ShellId"`.
pub fn shell_id(root: &Node, body: &str) -> Result<ShellId, WsmanError> {
    root.find_all(NS_WSMAN, "Selector")
        .into_iter()
        .find(|selector| selector.attr("Name") == Some("ShellId"))
        .or_else(|| root.find(NS_SHELL, "ShellId"))
        .map(|node| node.text.trim().to_string())
        .filter(|id| !id.is_empty())
        .map(ShellId)
        .ok_or_else(|| WsmanError::malformed("create reply carries no shell id", body))
}

pub fn command_id(root: &Node, body: &str) -> Result<CommandId, WsmanError> {
    root.find(NS_SHELL, "CommandId")
        .map(|node| node.text.trim().to_string())
        .filter(|id| !id.is_empty())
        .map(CommandId)
        .ok_or_else(|| WsmanError::malformed("command reply carries no command id", body))
}

/// Decodes a receive reply into per-stream text.
///
/// Stream fragments are base64; the decoded bytes of each stream are joined
/// before UTF-8 decoding so multi-byte characters split across fragments
/// survive. Carriage returns and a leading byte order mark are removed.
pub fn receive(root: &Node, body: &str, sequence: u64) -> Result<OutputChunk, WsmanError> {
    let response = root
        .find(NS_SHELL, "ReceiveResponse")
        .ok_or_else(|| WsmanError::malformed("receive reply carries no ReceiveResponse", body))?;

    let mut raw: BTreeMap<String, Vec<u8>> = BTreeMap::new();
    raw.insert(STDOUT.to_string(), Vec::new());
    raw.insert(STDERR.to_string(), Vec::new());

    for stream in response.find_all(NS_SHELL, "Stream") {
        let Some(name) = stream.attr("Name") else {
            continue;
        };
        let encoded = stream.text.trim();
        let bytes = raw.entry(name.to_string()).or_default();
        if encoded.is_empty() {
            continue;
        }
        let decoded = STANDARD.decode(encoded).map_err(|err| {
            WsmanError::malformed(format!("stream {name} is not valid base64: {err}"), body)
        })?;
        bytes.extend_from_slice(&decoded);
    }

    let streams = raw
        .into_iter()
        .map(|(name, bytes)| (name, clean_output(&bytes)))
        .collect();

    let command_state = response.find(NS_SHELL, "CommandState");
    let state = command_state
        .and_then(|node| node.attr("State"))
        .map_or(CommandState::Running, CommandState::from_uri);
    let exit_code = command_state
        .and_then(|node| node.child(NS_SHELL, "ExitCode"))
        .and_then(|node| node.text.trim().parse().ok());

    Ok(OutputChunk {
        sequence,
        state,
        exit_code,
        streams,
    })
}

fn clean_output(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes).replace('\r', "");
    match text.strip_prefix(BYTE_ORDER_MARK) {
        Some(rest) => rest.to_string(),
        None => text,
    }
}

pub fn enumeration_context(root: &Node, body: &str) -> Result<String, WsmanError> {
    root.find(NS_ENUMERATION, "EnumerateResponse")
        .and_then(|response| response.find(NS_ENUMERATION, "EnumerationContext"))
        .map(|node| node.text.trim().to_string())
        .ok_or_else(|| WsmanError::malformed("enumerate reply carries no context", body))
}

pub fn pull(root: &Node, body: &str) -> Result<PullResponse, WsmanError> {
    let response = root
        .find(NS_ENUMERATION, "PullResponse")
        .ok_or_else(|| WsmanError::malformed("pull reply carries no PullResponse", body))?;

    Ok(PullResponse {
        items: response
            .child(NS_ENUMERATION, "Items")
            .map(|items| items.children.clone())
            .unwrap_or_default(),
        context: response
            .child(NS_ENUMERATION, "EnumerationContext")
            .map(|node| node.text.trim().to_string())
            .filter(|context| !context.is_empty()),
        end_of_sequence: response.child(NS_ENUMERATION, "EndOfSequence").is_some(),
    })
}

/// The `s:Body` content of a get reply.
pub fn body(root: &Node, body: &str) -> Result<Node, WsmanError> {
    root.child(NS_SOAP, "Body")
        .and_then(|content| content.children.first())
        .cloned()
        .ok_or_else(|| WsmanError::malformed("reply has an empty body", body))
}

pub fn identity(root: &Node, body: &str) -> Result<Identity, WsmanError> {
    let response = root
        .find(NS_IDENTITY, "IdentifyResponse")
        .ok_or_else(|| WsmanError::malformed("identify reply carries no IdentifyResponse", body))?;
    let field = |local: &str| {
        response
            .child(NS_IDENTITY, local)
            .map(|node| node.text.trim().to_string())
            .unwrap_or_default()
    };

    Ok(Identity {
        protocol_version: field("ProtocolVersion"),
        product_vendor: field("ProductVendor"),
        product_version: field("ProductVersion"),
    })
}

/// Flattens a configuration element: leaves become their trimmed text,
/// everything else an object keyed by child local name.
pub fn config_to_value(node: &Node) -> serde_json::Value {
    let text = node.text.trim();
    if node.children.is_empty() || !text.is_empty() {
        return serde_json::Value::String(text.to_string());
    }
    serde_json::Value::Object(
        node.children
            .iter()
            .map(|child| (child.local_name().to_string(), config_to_value(child)))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::{clean_output, config_to_value};
    use crate::xml::parse;

    #[test]
    fn output_drops_carriage_returns_and_leading_bom() {
        assert_eq!(clean_output("\u{feff}a\r\nb\r\n".as_bytes()), "a\nb\n");
        assert_eq!(clean_output(b"plain"), "plain");
    }

    #[test]
    fn config_nests_by_local_name() {
        let root = parse(
            r#"<cfg:Config xmlns:cfg="urn:c">
                 <cfg:MaxEnvelopeSizekb>500</cfg:MaxEnvelopeSizekb>
                 <cfg:Client><cfg:NetworkDelayms>5000</cfg:NetworkDelayms></cfg:Client>
               </cfg:Config>"#,
        )
        .expect("config should parse");

        assert_eq!(
            config_to_value(&root),
            serde_json::json!({
                "MaxEnvelopeSizekb": "500",
                "Client": {"NetworkDelayms": "5000"},
            })
        );
    }
}
