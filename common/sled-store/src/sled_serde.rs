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

use byteorder::BigEndian;
use byteorder::ByteOrder;
use common_exception::ErrorCode;
use common_exception::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::IVec;

/// Serialize/deserialize a value for sled storage.
pub trait SledSerde: Serialize + DeserializeOwned {
    fn ser(&self) -> Result<IVec> {
        let x = serde_json::to_vec(self)?;
        Ok(x.into())
    }

    fn de<T: AsRef<[u8]>>(v: T) -> Result<Self>
    where Self: Sized {
        let s = serde_json::from_slice(v.as_ref())?;
        Ok(s)
    }
}

impl<T> SledSerde for T where T: Serialize + DeserializeOwned {}

/// Serialize/deserialize a sled key, preserving the value order in the byte
/// representation so that range scans see keys in their natural order.
pub trait SledOrderedSerde: Sized {
    fn ser(&self) -> Result<IVec>;
    fn de<T: AsRef<[u8]>>(v: T) -> Result<Self>;
}

impl SledOrderedSerde for u64 {
    fn ser(&self) -> Result<IVec> {
        let size = std::mem::size_of::<u64>();
        let mut buf = vec![0; size];
        BigEndian::write_u64(&mut buf, *self);
        Ok(buf.into())
    }

    fn de<T: AsRef<[u8]>>(v: T) -> Result<Self> {
        let res = BigEndian::read_u64(v.as_ref());
        Ok(res)
    }
}

impl SledOrderedSerde for i64 {
    // Flip the sign bit so negative values sort before positive ones.
    fn ser(&self) -> Result<IVec> {
        let biased = (*self as u64) ^ (1 << 63);
        SledOrderedSerde::ser(&biased)
    }

    fn de<T: AsRef<[u8]>>(v: T) -> Result<Self> {
        let biased = <u64 as SledOrderedSerde>::de(v)?;
        Ok((biased ^ (1 << 63)) as i64)
    }
}

impl SledOrderedSerde for String {
    fn ser(&self) -> Result<IVec> {
        Ok(IVec::from(self.as_bytes()))
    }

    fn de<T: AsRef<[u8]>>(v: T) -> Result<Self> {
        let s = String::from_utf8(v.as_ref().to_vec())
            .map_err(|e| ErrorCode::MetaStoreDamaged(format!("invalid utf8 key: {}", e)))?;
        Ok(s)
    }
}
