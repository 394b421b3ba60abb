//! Response envelope types shared by the API endpoints.

use serde::Serialize;

/// Envelope for lookup endpoints that report a message next to their data,
/// e.g. the gwas-missing POST and empty-result 404 bodies:
/// `{ "message": "success", "data": ... }`.
#[derive(Debug, Serialize)]
pub struct MessageEnvelope<T> {
    pub message: String,
    pub data: T,
}

impl<T> MessageEnvelope<T> {
    pub fn success(data: T) -> Self {
        Self {
            message: "success".to_string(),
            data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_envelope() {
        let envelope = MessageEnvelope::success(vec![1, 2, 3]);
        assert_eq!(envelope.message, "success");
        assert_eq!(envelope.data, vec![1, 2, 3]);
    }
}
