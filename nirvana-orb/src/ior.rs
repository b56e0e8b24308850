//! Interoperable Object Reference (spec.md §6): `{type_id, profiles}`.

/// IIOP listen-point tag carried in a `TaggedProfile` (spec.md §6: "Primary
/// tag used: IIOP ListenPoint (host, port)").
pub const TAG_INTERNET_IOP: u32 = 0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedProfile {
    pub tag: u32,
    pub profile_data: Vec<u8>,
}

impl TaggedProfile {
    pub fn iiop(host: &str, port: u16, object_key: &[u8]) -> Self {
        let mut data = Vec::with_capacity(host.len() + object_key.len() + 8);
        data.extend_from_slice(&(host.len() as u32).to_le_bytes());
        data.extend_from_slice(host.as_bytes());
        data.extend_from_slice(&port.to_le_bytes());
        data.extend_from_slice(&(object_key.len() as u32).to_le_bytes());
        data.extend_from_slice(object_key);
        Self { tag: TAG_INTERNET_IOP, profile_data: data }
    }

    /// Decodes the `(host, port, object_key)` triple out of an IIOP
    /// profile previously built by [`Self::iiop`]. Returns `None` for any
    /// other tag or a malformed payload.
    pub fn as_iiop(&self) -> Option<(String, u16, Vec<u8>)> {
        if self.tag != TAG_INTERNET_IOP {
            return None;
        }
        let buf = &self.profile_data;
        if buf.len() < 4 {
            return None;
        }
        let host_len = u32::from_le_bytes(buf.get(0..4)?.try_into().ok()?) as usize;
        let mut pos = 4;
        let host = String::from_utf8(buf.get(pos..pos + host_len)?.to_vec()).ok()?;
        pos += host_len;
        let port = u16::from_le_bytes(buf.get(pos..pos + 2)?.try_into().ok()?);
        pos += 2;
        let key_len = u32::from_le_bytes(buf.get(pos..pos + 4)?.try_into().ok()?) as usize;
        pos += 4;
        let object_key = buf.get(pos..pos + key_len)?.to_vec();
        Some((host, port, object_key))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ior {
    pub type_id: String,
    pub profiles: Vec<TaggedProfile>,
}

impl Ior {
    pub fn new(type_id: impl Into<String>, profiles: Vec<TaggedProfile>) -> Self {
        Self { type_id: type_id.into(), profiles }
    }

    pub fn is_nil(&self) -> bool {
        self.type_id.is_empty() && self.profiles.is_empty()
    }

    pub fn first_iiop(&self) -> Option<(String, u16, Vec<u8>)> {
        self.profiles.iter().find_map(TaggedProfile::as_iiop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iiop_profile_round_trips() {
        let profile = TaggedProfile::iiop("localhost", 4649, b"obj-key-1");
        let (host, port, key) = profile.as_iiop().unwrap();
        assert_eq!(host, "localhost");
        assert_eq!(port, 4649);
        assert_eq!(key, b"obj-key-1");
    }

    #[test]
    fn nil_ior_has_no_profiles() {
        let ior = Ior::new("", vec![]);
        assert!(ior.is_nil());
        assert_eq!(ior.first_iiop(), None);
    }

    #[test]
    fn first_iiop_skips_unknown_tags() {
        let unknown = TaggedProfile { tag: 99, profile_data: vec![] };
        let iiop = TaggedProfile::iiop("host", 1, b"k");
        let ior = Ior::new("IDL:Foo:1.0", vec![unknown, iiop]);
        let (host, _, _) = ior.first_iiop().unwrap();
        assert_eq!(host, "host");
    }
}
