use crate::reflect::ReflectValue;
use std::collections::BTreeMap;

/// Request metadata gathered from the environment when the process is
/// serving a request. All fields are optional because a background job or
/// CLI invocation has none of them.
///
/// `query_params`/`form_params`/`session` are separate from the
/// `method`/`path`/... fields above: those feed `request_context` on the
/// emitted record, these feed the `$GET`/`$POST`/`$SESSION` entries under
/// `local_variables` (see `ExceptionCapture::exception_as_variables`).
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub method: Option<String>,
    pub path: Option<String>,
    pub host: Option<String>,
    pub user_agent: Option<String>,
    pub remote_addr: Option<String>,
    pub request_id: Option<String>,
    pub query_params: Vec<(String, ReflectValue)>,
    pub form_params: Vec<(String, ReflectValue)>,
    pub session: Vec<(String, ReflectValue)>,
}

impl RequestContext {
    pub fn is_empty(&self) -> bool {
        self.method.is_none()
            && self.path.is_none()
            && self.host.is_none()
            && self.user_agent.is_none()
            && self.remote_addr.is_none()
            && self.request_id.is_none()
            && self.query_params.is_empty()
            && self.form_params.is_empty()
            && self.session.is_empty()
    }

    pub fn as_map(&self) -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();
        if let Some(v) = &self.method { map.insert("method".to_string(), v.clone()); }
        if let Some(v) = &self.path { map.insert("path".to_string(), v.clone()); }
        if let Some(v) = &self.host { map.insert("host".to_string(), v.clone()); }
        if let Some(v) = &self.user_agent { map.insert("user_agent".to_string(), v.clone()); }
        if let Some(v) = &self.remote_addr { map.insert("remote_addr".to_string(), v.clone()); }
        if let Some(v) = &self.request_id { map.insert("request_id".to_string(), v.clone()); }
        map
    }
}

/// Gathers the ambient request context. A host integration normally
/// overrides this by constructing a [`RequestContext`] directly from its
/// own request object and passing it to [`crate::capture::ExceptionCapture::capture`];
/// this probe is the fallback used when no context is supplied explicitly.
pub fn gather() -> RequestContext {
    RequestContext::default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_probe_is_empty() {
        assert!(gather().is_empty());
    }

    #[test]
    fn as_map_only_includes_present_fields() {
        let mut ctx = RequestContext::default();
        ctx.method = Some("GET".to_string());
        let map = ctx.as_map();
        assert_eq!(map.len(), 1);
        assert_eq!(map.get("method"), Some(&"GET".to_string()));
    }
}
