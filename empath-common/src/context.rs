use std::{borrow::Cow, ffi::CStr, fmt::Debug, sync::Arc};

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

use crate::{delivery::DeliveryContext, envelope::Envelope, ffi, internal, status::Status};

/// Capabilities negotiated or advertised for a session
///
/// Mirrors the SMTP extensions a session may advertise in its EHLO response.
/// Stored on [`Context`] so that modules (and FFI consumers) can inspect what
/// the session supports without reaching into the protocol layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Capability {
    Starttls,
    Help,
    Size(usize),
    Auth(Vec<String>),
    EightBitMime,
    Pipelining,
    EnhancedStatusCodes,
}

/// The context for a single message as it moves through the system
///
/// A `Context` is created when a message is accepted (e.g. via SMTP), spooled
/// to disk, and read back by the delivery processor. It carries the envelope,
/// the raw message data, and whatever delivery state has been persisted
/// alongside it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Context {
    pub id: String,
    pub envelope: Envelope,
    pub data: Option<Arc<[u8]>>,
    pub response: Option<(Status, Cow<'static, str>)>,
    pub metadata: AHashMap<String, String>,
    pub banner: Arc<str>,
    pub max_message_size: usize,
    pub capabilities: Vec<Capability>,
    pub delivery: Option<DeliveryContext>,
    pub tracking_id: Option<String>,
    pub extended: bool,
    /// Whether the client has successfully completed `AUTH` on this connection.
    pub authenticated: bool,
}

impl Default for Context {
    fn default() -> Self {
        Self {
            id: String::new(),
            envelope: Envelope::default(),
            data: None,
            response: None,
            metadata: AHashMap::default(),
            banner: Arc::from(""),
            max_message_size: 0,
            capabilities: Vec::new(),
            delivery: None,
            tracking_id: None,
            extended: false,
            authenticated: false,
        }
    }
}

impl Context {
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn message(&self) -> String {
        self.data.as_deref().map_or_else(Default::default, |data| {
            std::str::from_utf8(data).map_or_else(|_| format!("{:#?}", self.data), str::to_string)
        })
    }

    #[must_use]
    pub fn sender(&self) -> String {
        self.envelope
            .sender()
            .map(std::string::ToString::to_string)
            .unwrap_or_default()
    }

    #[must_use]
    pub fn recipients(&self) -> Vec<String> {
        self.envelope.recipients().map_or_else(Vec::new, |addrs| {
            addrs
                .iter()
                .map(|addr| match &**addr {
                    mailparse::MailAddr::Group(group) => {
                        format!("RCPT TO:{}", group.group_name)
                    }
                    mailparse::MailAddr::Single(single) => {
                        format!(
                            "RCPT TO:{}{}",
                            single.display_name.clone().unwrap_or_default(),
                            single.addr
                        )
                    }
                })
                .collect()
        })
    }
}

/// Retrieve the id associated with this context
///
/// This is the only way to retrieve the id for the context in an
/// ffi-compatible way. Any other way should be retrieved by
/// accessing the id member directly.
///
#[no_mangle]
#[allow(clippy::module_name_repetitions)]
pub extern "C" fn em_context_get_id(validate_context: &Context) -> ffi::string::String {
    validate_context.id().into()
}

#[no_mangle]
#[allow(clippy::module_name_repetitions)]
pub extern "C" fn em_context_get_recipients(
    validate_context: &Context,
) -> ffi::string::StringVector {
    validate_context.recipients().into()
}

#[no_mangle]
#[allow(clippy::module_name_repetitions)]
pub extern "C" fn em_context_get_sender(validate_context: &Context) -> ffi::string::String {
    validate_context.sender().into()
}

///
/// Set the sender for the message. A special value of NULL will set the
/// sender to the NULL Sender.
///
/// # Safety
///
/// This should be able to be passed any valid pointer, and a valid `validate_context`, to
/// set the sender
///
#[no_mangle]
#[allow(clippy::module_name_repetitions)]
pub unsafe extern "C" fn em_context_set_sender(
    validate_context: &mut Context,
    sender: *const libc::c_char,
) -> i32 {
    if sender.is_null() {
        *validate_context.envelope.sender_mut() = None;
        return 0;
    }

    let sender = CStr::from_ptr(sender);

    match sender.to_str() {
        Ok(sender) => match mailparse::addrparse(sender) {
            Ok(mut sender) => {
                *validate_context.envelope.sender_mut() =
                    Some(crate::address::Address(sender.remove(0)));
                0
            }
            Err(err) => {
                internal!("Invalid sender: {:?} :: {}", sender, err.to_string());
                1
            }
        },
        Err(err) => {
            internal!("Invalid sender: {:?} :: {}", sender, err.to_string());
            1
        }
    }
}

#[no_mangle]
#[allow(clippy::module_name_repetitions)]
pub extern "C" fn em_context_get_data(validate_context: &Context) -> ffi::string::String {
    validate_context
        .data
        .as_ref()
        .map_or_else(Default::default, |data| {
            ffi::string::String::try_from(&data[..]).unwrap_or_default()
        })
}

///
/// # Safety
///
/// Even if provided with a null pointer, that would simply set the response to `None`
///
#[no_mangle]
#[allow(clippy::module_name_repetitions)]
pub unsafe extern "C" fn em_context_set_data_response(
    validate_context: &mut Context,
    response: *const libc::c_char,
) -> i32 {
    if response.is_null() {
        validate_context.response = None;
    } else {
        let response = CStr::from_ptr(response);
        validate_context.response = Some((
            Status::Ok,
            Cow::Owned(response.to_owned().to_string_lossy().to_string()),
        ));
    }

    0
}

///
/// # Safety
///
/// Provided with a null pointer, simply return false
///
#[no_mangle]
#[allow(clippy::module_name_repetitions)]
pub unsafe extern "C" fn em_context_exists(
    validate_context: &Context,
    key: *const libc::c_char,
) -> bool {
    if key.is_null() {
        false
    } else {
        CStr::from_ptr(key)
            .to_str()
            .map_or(false, |key| validate_context.metadata.contains_key(key))
    }
}

///
/// # Safety
///
/// Provided with a null pointer, simply return false
///
#[no_mangle]
#[allow(clippy::module_name_repetitions)]
pub unsafe extern "C" fn em_context_set(
    validate_context: &mut Context,
    key: *const libc::c_char,
    value: *const libc::c_char,
) -> bool {
    if key.is_null() || value.is_null() {
        false
    } else {
        CStr::from_ptr(key).to_str().map_or(false, |key| {
            let value = CStr::from_ptr(value)
                .to_str()
                .map(String::from)
                .unwrap_or_default();
            *validate_context
                .metadata
                .entry(key.to_string())
                .or_default() = value;
            true
        })
    }
}

///
/// # Safety
///
/// Provided with a null pointer, simply return a default value
///
#[no_mangle]
#[allow(clippy::module_name_repetitions)]
pub unsafe extern "C" fn em_context_get(
    validate_context: &Context,
    key: *const libc::c_char,
) -> ffi::string::String {
    if key.is_null() {
        ffi::string::String::default()
    } else {
        CStr::from_ptr(key)
            .to_str()
            .ok()
            .and_then(|key| validate_context.metadata.get(key))
            .map_or_else(ffi::string::String::default, std::convert::Into::into)
    }
}
