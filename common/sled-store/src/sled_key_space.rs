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

use std::fmt::Debug;

use common_exception::Result;
use sled::IVec;

use crate::SledOrderedSerde;
use crate::SledSerde;

/// A `SledKeySpace` is a virtual column family inside one sled::Tree: every
/// key is prefixed with one identifying byte, so several key spaces share a
/// tree, and a batch spanning key spaces commits atomically.
pub trait SledKeySpace {
    const PREFIX: u8;
    const NAME: &'static str;

    type K: SledOrderedSerde + Debug;
    type V: SledSerde;

    fn serialize_key(k: &Self::K) -> Result<IVec> {
        let b = k.ser()?;
        let mut buf = Vec::with_capacity(1 + b.len());
        buf.push(Self::PREFIX);
        buf.extend_from_slice(b.as_ref());
        Ok(buf.into())
    }

    fn deserialize_key<T: AsRef<[u8]>>(iv: T) -> Result<Self::K> {
        Self::K::de(&iv.as_ref()[1..])
    }

    fn serialize_value(v: &Self::V) -> Result<IVec> {
        v.ser()
    }

    fn deserialize_value<T: AsRef<[u8]>>(iv: T) -> Result<Self::V> {
        Self::V::de(iv)
    }

    /// The half-open byte range `[PREFIX, PREFIX+1)` covering this key space.
    fn span() -> (Vec<u8>, Vec<u8>) {
        (vec![Self::PREFIX], vec![Self::PREFIX + 1])
    }
}
