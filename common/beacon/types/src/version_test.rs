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

use pretty_assertions::assert_eq;

use crate::ConfigVersion;

#[test]
fn test_version_ordering() {
    let v100 = ConfigVersion::new(1, 0, 0);
    let v110 = ConfigVersion::new(1, 1, 0);
    let v090 = ConfigVersion::new(0, 9, 9);
    let v2 = ConfigVersion::new(2, 0, 0);

    assert!(v090 < v100);
    assert!(v100 < v110);
    assert!(v110 < v2);
    assert!(ConfigVersion::default().is_zero());
}

#[test]
fn test_version_parse_display() {
    let v: ConfigVersion = "1.2.3".parse().unwrap();
    assert_eq!(ConfigVersion::new(1, 2, 3), v);
    assert_eq!("1.2.3", v.to_string());

    assert!("1.2".parse::<ConfigVersion>().is_err());
    assert!("1.2.3.4".parse::<ConfigVersion>().is_err());
    assert!("a.b.c".parse::<ConfigVersion>().is_err());
}
