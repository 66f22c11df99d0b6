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

use crate::ErrorCode;
use crate::ToErrorCode;

#[test]
fn test_format_with_error_codes() {
    assert_eq!(
        format!("{}", ErrorCode::Ok("test message 1")),
        "Code: 0, displayText = test message 1."
    );
    assert_eq!(
        format!("{}", ErrorCode::UnknownException("test message 2")),
        "Code: 1000, displayText = test message 2."
    );
    assert_eq!(
        format!("{}", ErrorCode::MetaStoreDamaged("test message 3")),
        "Code: 1002, displayText = test message 3."
    );
}

#[test]
fn test_map_err_to_code() {
    let rst: std::result::Result<(), std::fmt::Error> = Err(std::fmt::Error {});
    let err = rst
        .map_err_to_code(ErrorCode::MetaStoreDamaged, || "while writing")
        .unwrap_err();

    assert_eq!(1002, err.code());
    assert_eq!(
        "Code: 1002, displayText = while writing, cause: an error occurred when formatting an argument.",
        format!("{}", err)
    );
}
