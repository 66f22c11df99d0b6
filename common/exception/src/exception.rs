// Copyright 2021 Datafuse Labs.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![allow(non_snake_case)]

use std::fmt::Debug;
use std::fmt::Display;
use std::fmt::Formatter;
use std::sync::Arc;

use backtrace::Backtrace;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ErrorCode>;

#[derive(Error)]
pub struct ErrorCode {
    code: u16,
    display_text: String,
    // The backtrace of the first error site, if capturing was possible.
    backtrace: Option<Arc<Backtrace>>,
}

impl ErrorCode {
    pub fn code(&self) -> u16 {
        self.code
    }

    pub fn message(&self) -> String {
        self.display_text.clone()
    }

    pub fn add_message(self, msg: impl AsRef<str>) -> Self {
        Self {
            code: self.code,
            display_text: format!("{}\n{}", msg.as_ref(), self.display_text),
            backtrace: self.backtrace,
        }
    }

    pub fn backtrace_str(&self) -> String {
        match self.backtrace.as_ref() {
            None => "".to_string(),
            Some(b) => format!("{:?}", b),
        }
    }
}

macro_rules! build_exceptions {
    ($($body:ident($code:expr)),*$(,)*) => {
        impl ErrorCode {
            $(
                pub fn $body(display_text: impl Into<String>) -> ErrorCode {
                    ErrorCode {
                        code: $code,
                        display_text: display_text.into(),
                        backtrace: Some(Arc::new(Backtrace::new())),
                    }
                }
            )*
        }
    }
}

build_exceptions! {
    Ok(0),
    UnknownException(1000),
    InvalidConfig(1001),
    MetaStoreDamaged(1002),
    MetaStoreAlreadyExists(1003),
    MetaStoreNotFound(1004),
    SerdeError(1005),
    TokioError(1006),
    Timeout(1007),
    MetaServiceError(1008),
    InvalidConfigVersion(1009),
    RaftError(1010),
    IllegalRequest(1011),
    SnapshotDamaged(1012),
    UnknownPeer(1013),
    RetryLimitExceeded(1014),
    BadAddressFormat(1015),
    IoError(1016),
    ShutdownInProgress(1017),
}

impl Display for ErrorCode {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "Code: {}, displayText = {}.", self.code, self.display_text)
    }
}

impl Debug for ErrorCode {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "Code: {}, displayText = {}.", self.code, self.display_text)
    }
}

impl ErrorCode {
    pub fn from_std_error<T: std::error::Error>(error: T) -> Self {
        ErrorCode {
            code: 1000,
            display_text: format!("{}", error),
            backtrace: Some(Arc::new(Backtrace::new())),
        }
    }
}

impl From<std::io::Error> for ErrorCode {
    fn from(error: std::io::Error) -> Self {
        ErrorCode::IoError(format!("{}", error))
    }
}

impl From<serde_json::Error> for ErrorCode {
    fn from(error: serde_json::Error) -> Self {
        ErrorCode::SerdeError(format!("json (de)serialize: {}", error))
    }
}

impl From<std::net::AddrParseError> for ErrorCode {
    fn from(error: std::net::AddrParseError) -> Self {
        ErrorCode::BadAddressFormat(format!("bad address format: {}", error))
    }
}

impl From<anyhow::Error> for ErrorCode {
    fn from(error: anyhow::Error) -> Self {
        ErrorCode {
            code: 1000,
            display_text: format!("{}, source: {:?}", error, error.source()),
            backtrace: Some(Arc::new(Backtrace::new())),
        }
    }
}

impl From<tonic::Status> for ErrorCode {
    fn from(status: tonic::Status) -> Self {
        ErrorCode::MetaServiceError(format!("tonic status: {}", status))
    }
}

impl From<tonic::transport::Error> for ErrorCode {
    fn from(error: tonic::transport::Error) -> Self {
        ErrorCode::MetaServiceError(format!("tonic transport: {}", error))
    }
}

/// Map any error into an `ErrorCode` with a lazily built context message.
///
/// ```ignore
/// db.drop_tree(n).map_err_to_code(ErrorCode::MetaStoreDamaged, || "drop tree")?;
/// ```
pub trait ToErrorCode<T, E, CtxFn>
where E: Display + Send + Sync + 'static
{
    fn map_err_to_code<ErrFn, D>(self, make_exception: ErrFn, context_fn: CtxFn) -> Result<T>
    where
        ErrFn: FnOnce(String) -> ErrorCode,
        D: Display,
        CtxFn: FnOnce() -> D;
}

impl<T, E, CtxFn> ToErrorCode<T, E, CtxFn> for std::result::Result<T, E>
where E: Display + Send + Sync + 'static
{
    fn map_err_to_code<ErrFn, D>(self, make_exception: ErrFn, context_fn: CtxFn) -> Result<T>
    where
        ErrFn: FnOnce(String) -> ErrorCode,
        D: Display,
        CtxFn: FnOnce() -> D,
    {
        self.map_err(|error| {
            let err_text = format!("{}, cause: {}", context_fn(), error);
            make_exception(err_text)
        })
    }
}
