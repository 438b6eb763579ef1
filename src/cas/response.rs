//! Parsers for CAS server responses.
//!
//! v1 answers with two lines of text. v2/v3 answer with a `cas:serviceResponse`
//! XML document; element names are matched on their local part so any
//! namespace prefix is accepted.

use quick_xml::{
    events::{BytesStart, Event},
    Reader,
};

use super::{
    attributes::{insert_value, Attributes},
    error::ValidationFailure,
    validator::Validated,
};

const V1_REJECTED_CODE: &str = "INVALID_TICKET";

/// Parse the v1 `/validate` body: `yes\n<user>\n` or `no\n\n`.
pub(crate) fn parse_v1(body: &str) -> Result<Validated, ValidationFailure> {
    let mut lines = body.lines();
    match lines.next().map(str::trim) {
        Some("yes") => {
            let user = lines
                .next()
                .map(str::trim)
                .filter(|user| !user.is_empty())
                .ok_or_else(|| malformed("v1 success without a username"))?;
            Ok(Validated::new(user.to_string(), Attributes::new()))
        }
        Some("no") => Err(ValidationFailure::CasRejected {
            code: V1_REJECTED_CODE.to_string(),
            description: "ticket not recognized".to_string(),
        }),
        _ => Err(malformed("v1 response must start with yes or no")),
    }
}

/// Parse a v2/v3 `serviceValidate`/`proxyValidate` document.
pub(crate) fn parse_service_response(body: &str) -> Result<Validated, ValidationFailure> {
    let root = service_response(body)?;

    if let Some(success) = root.child("authenticationSuccess") {
        let user = success
            .child("user")
            .map(Element::text)
            .filter(|user| !user.is_empty())
            .ok_or_else(|| malformed("authenticationSuccess without user"))?;

        let mut attributes = Attributes::new();
        if let Some(block) = success.child("attributes") {
            collect_attributes(block, &mut attributes);
        }

        let mut validated = Validated::new(user.to_string(), attributes);
        validated.pgt_iou = success
            .child("proxyGrantingTicket")
            .map(Element::text)
            .filter(|iou| !iou.is_empty())
            .map(ToString::to_string);
        validated.proxies = success
            .child("proxies")
            .map(|proxies| {
                proxies
                    .children_named("proxy")
                    .map(|proxy| proxy.text().to_string())
                    .collect()
            })
            .unwrap_or_default();
        return Ok(validated);
    }

    if let Some(failure) = root.child("authenticationFailure") {
        return Err(rejected(failure));
    }

    Err(malformed("serviceResponse without success or failure"))
}

/// Parse a `/proxy` document into the issued proxy ticket.
pub(crate) fn parse_proxy_response(body: &str) -> Result<String, ValidationFailure> {
    let root = service_response(body)?;

    if let Some(success) = root.child("proxySuccess") {
        return success
            .child("proxyTicket")
            .map(Element::text)
            .filter(|ticket| !ticket.is_empty())
            .map(ToString::to_string)
            .ok_or_else(|| malformed("proxySuccess without proxyTicket"));
    }

    if let Some(failure) = root.child("proxyFailure") {
        return Err(rejected(failure));
    }

    Err(malformed("serviceResponse without proxySuccess or proxyFailure"))
}

// Both `<cas:sn>Doe</cas:sn>` and `<cas:attribute name="sn" value="Doe"/>` occur in the wild.
fn collect_attributes(block: &Element, attributes: &mut Attributes) {
    for child in &block.children {
        if child.name == "attribute" {
            if let (Some(name), Some(value)) = (child.attr("name"), child.attr("value")) {
                insert_value(attributes, name, value.to_string());
                continue;
            }
        }
        insert_value(attributes, &child.name, child.text().to_string());
    }
}

fn rejected(failure: &Element) -> ValidationFailure {
    ValidationFailure::CasRejected {
        code: failure.attr("code").unwrap_or("UNKNOWN").to_string(),
        description: failure.text().to_string(),
    }
}

fn service_response(body: &str) -> Result<Element, ValidationFailure> {
    let root = parse_tree(body)?;
    if root.name == "serviceResponse" {
        Ok(root)
    } else {
        Err(malformed(format!("unexpected root element {}", root.name)))
    }
}

fn malformed(reason: impl std::fmt::Display) -> ValidationFailure {
    ValidationFailure::MalformedResponse(reason.to_string())
}

#[derive(Debug, Default)]
struct Element {
    name: String,
    attrs: Vec<(String, String)>,
    text: String,
    children: Vec<Element>,
}

impl Element {
    fn from_start(start: &BytesStart<'_>) -> Result<Self, ValidationFailure> {
        let name = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
        let mut attrs = Vec::new();
        for attr in start.attributes() {
            let attr = attr.map_err(malformed)?;
            let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
            let value = attr.unescape_value().map_err(malformed)?.into_owned();
            attrs.push((key, value));
        }
        Ok(Self {
            name,
            attrs,
            ..Self::default()
        })
    }

    fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|child| child.name == name)
    }

    fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> {
        self.children.iter().filter(move |child| child.name == name)
    }

    fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    fn text(&self) -> &str {
        self.text.trim()
    }
}

fn parse_tree(body: &str) -> Result<Element, ValidationFailure> {
    let mut reader = Reader::from_str(body);
    reader.trim_text(true);

    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        match reader.read_event().map_err(malformed)? {
            Event::Start(start) => stack.push(Element::from_start(&start)?),
            Event::Empty(start) => {
                let element = Element::from_start(&start)?;
                attach(&mut stack, &mut root, element)?;
            }
            Event::End(_) => {
                let element = stack.pop().ok_or_else(|| malformed("unbalanced end tag"))?;
                attach(&mut stack, &mut root, element)?;
            }
            Event::Text(text) => {
                if let Some(current) = stack.last_mut() {
                    current.text.push_str(&text.unescape().map_err(malformed)?);
                }
            }
            Event::CData(data) => {
                if let Some(current) = stack.last_mut() {
                    current
                        .text
                        .push_str(&String::from_utf8_lossy(&data.into_inner()));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err(malformed("unexpected end of document"));
    }
    root.ok_or_else(|| malformed("empty document"))
}

fn attach(
    stack: &mut [Element],
    root: &mut Option<Element>,
    element: Element,
) -> Result<(), ValidationFailure> {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(element);
        Ok(())
    } else if root.is_none() {
        *root = Some(element);
        Ok(())
    } else {
        Err(malformed("multiple root elements"))
    }
}
