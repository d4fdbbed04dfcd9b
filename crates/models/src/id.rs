/// Id is an 8-byte identifier rendered as sixteen lowercase hex characters.
/// It's used as the external, URL-safe identity of every public entity
/// (pages, projects, files, import jobs), distinct from internal row ids.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Id([u8; 8]);

impl Id {
    pub fn zero() -> Self {
        Self([0u8; 8])
    }
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 8]
    }
    pub fn new(b: [u8; 8]) -> Self {
        Self(b)
    }
    pub fn from_hex<T: AsRef<[u8]>>(hex: T) -> Result<Self, hex::FromHexError> {
        let vec_bytes = hex::decode(hex)?;
        let exact: [u8; 8] = vec_bytes
            .as_slice()
            .try_into()
            .map_err(|_| hex::FromHexError::InvalidStringLength)?;

        Ok(Id(exact))
    }
}

impl std::str::FromStr for Id {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Id::from_hex(s)
    }
}

impl std::fmt::Display for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", u64::from_be_bytes(self.0))
    }
}

impl std::fmt::Debug for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        <Self as std::fmt::Display>::fmt(self, f)
    }
}

impl serde::Serialize for Id {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        format!("{self}").serialize(serializer)
    }
}

impl<'de> serde::Deserialize<'de> for Id {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use serde::de::Error;
        let str_val = std::borrow::Cow::<'de, str>::deserialize(deserializer)?;
        Id::from_hex(str_val.as_ref()).map_err(|err| D::Error::custom(format!("invalid id: {err}")))
    }
}

// Ids are stored as their sixteen-character hex rendering in TEXT columns.
impl sqlx::Type<sqlx::Postgres> for Id {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        <String as sqlx::Type<sqlx::Postgres>>::type_info()
    }
}

impl sqlx::Encode<'_, sqlx::Postgres> for Id {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> sqlx::encode::IsNull {
        <String as sqlx::Encode<'_, sqlx::Postgres>>::encode_by_ref(&self.to_string(), buf)
    }
}

impl sqlx::Decode<'_, sqlx::Postgres> for Id {
    fn decode(
        value: sqlx::postgres::PgValueRef<'_>,
    ) -> Result<Self, Box<dyn std::error::Error + Send + Sync + 'static>> {
        let str_val = <&str as sqlx::Decode<'_, sqlx::Postgres>>::decode(value)?;
        Ok(Id::from_hex(str_val)?)
    }
}

/// IdGenerator deterministically builds process-unique Ids from a millisecond
/// wall clock, a per-process shard, and a rolling sequence counter.
/// Shard zero is reserved for ids minted by the database itself.
#[derive(Debug, Clone)]
pub struct IdGenerator {
    shard: u16,
    seq: u16,
    last_millis: u64,
}

impl IdGenerator {
    pub fn new(shard: u16) -> Self {
        Self {
            shard: shard & 0x3ff,
            seq: 0,
            last_millis: 0,
        }
    }

    pub fn next(&mut self) -> Id {
        let millis = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("wall clock is before the unix epoch")
            .as_millis() as u64;

        if millis != self.last_millis {
            self.last_millis = millis;
            self.seq = 0;
        }
        let seq = self.seq;
        self.seq = (self.seq + 1) & 0x3ff;

        // 44 bits of clock, 10 bits of shard, 10 bits of sequence.
        let v = (millis << 20) | ((self.shard as u64) << 10) | (seq as u64);
        Id(v.to_be_bytes())
    }
}

#[cfg(test)]
mod test {
    use super::{Id, IdGenerator};

    #[test]
    fn test_id_round_trip() {
        let id = Id::new([0x08, 0xab, 0x45, 0xcd, 0x12, 0x34, 0x56, 0x78]);
        assert_eq!(id.to_string(), "08ab45cd12345678");
        assert_eq!(Id::from_hex("08ab45cd12345678").unwrap(), id);

        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"08ab45cd12345678\"");
        assert_eq!(serde_json::from_str::<Id>(&json).unwrap(), id);
    }

    #[test]
    fn test_id_rejects_malformed_hex() {
        assert!(Id::from_hex("xyz").is_err());
        assert!(Id::from_hex("08ab45cd").is_err()); // too short
        assert!(Id::from_hex("08ab45cd1234567800").is_err()); // too long
    }

    #[test]
    fn test_generator_is_strictly_increasing() {
        let mut gen = IdGenerator::new(42);
        let mut last = Id::zero();
        for _ in 0..1000 {
            let next = gen.next();
            assert!(next > last, "{next:?} must sort above {last:?}");
            last = next;
        }
    }
}
