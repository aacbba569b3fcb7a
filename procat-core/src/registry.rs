//! # Descriptor Registry
//!
//! In-memory index over one or more registered [`FileDescriptorSet`]s.
//! Three mappings are maintained over a single resolved descriptor graph:
//! file name → file descriptor, service FQN → service descriptor, and
//! message FQN → message descriptor (nested messages included).
//!
//! Registration keeps the raw file protos around, keyed by file name, so
//! that re-registering a file replaces its entry instead of double
//! counting, and so the whole registry can be serialized back to a
//! `FileDescriptorSet`.
//!
//! All operations are safe under concurrent use: readers share a lock,
//! [`Registry::register`] and [`Registry::clear`] take it exclusively.

mod schema;

use std::collections::{BTreeMap, HashMap, HashSet};

use parking_lot::RwLock;
use prost::Message;
use prost_reflect::{DescriptorPool, FileDescriptor, MessageDescriptor, MethodDescriptor, ServiceDescriptor};
use prost_types::{FileDescriptorProto, FileDescriptorSet};

/// Errors produced by registry operations.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("failed to resolve descriptor graph: {0}")]
    Invalid(#[from] prost_reflect::DescriptorError),

    #[error("failed to decode descriptor set: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("service not found: {0}")]
    ServiceNotFound(String),

    #[error("method not found: {service}.{method}")]
    MethodNotFound { service: String, method: String },

    #[error("message not found: {0}")]
    MessageNotFound(String),
}

/// Externally visible metadata about a service.
#[derive(Debug, Clone, Default)]
pub struct ServiceInfo {
    /// Fully-qualified service name.
    pub name: String,
    pub package: String,
    pub methods: Vec<MethodInfo>,
    pub documentation: String,
}

/// Externally visible metadata about a method.
#[derive(Debug, Clone, Default)]
pub struct MethodInfo {
    pub name: String,
    /// Fully-qualified input message name.
    pub input_type: String,
    /// Fully-qualified output message name.
    pub output_type: String,
    pub documentation: String,
    pub client_streaming: bool,
    pub server_streaming: bool,
}

/// Registry statistics over current map contents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    pub files: usize,
    pub services: usize,
    pub messages: usize,
}

#[derive(Default, Clone)]
struct Inner {
    /// Raw file protos by file name; the source of truth for rebuilds.
    protos: HashMap<String, FileDescriptorProto>,
    files: HashMap<String, FileDescriptor>,
    services: HashMap<String, ServiceDescriptor>,
    messages: HashMap<String, MessageDescriptor>,
    /// Leading comments keyed by service FQN or `<service FQN>.<method>`.
    docs: HashMap<String, String>,
}

/// Thread-safe descriptor index with JSON-schema projection.
pub struct Registry {
    inner: RwLock<Inner>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }

    /// Registers a descriptor set. Files already present are replaced by
    /// the incoming version; the descriptor graph is re-resolved over the
    /// union and all three mappings are swapped atomically.
    pub fn register(&self, fds: &FileDescriptorSet) -> Result<(), RegistryError> {
        let mut inner = self.inner.write();

        let mut protos = inner.protos.clone();
        for file in &fds.file {
            protos.insert(file.name().to_string(), file.clone());
        }

        let merged = FileDescriptorSet {
            file: protos.values().cloned().collect(),
        };
        let pool = DescriptorPool::from_file_descriptor_set(merged)?;

        let mut rebuilt = Inner {
            protos,
            ..Default::default()
        };
        for file in pool.files() {
            rebuilt
                .files
                .insert(file.name().to_string(), file.clone());
            for svc in file.services() {
                rebuilt
                    .services
                    .insert(svc.full_name().to_string(), svc);
            }
            for msg in file.messages() {
                index_message(&msg, &mut rebuilt.messages);
            }
        }
        for proto in rebuilt.protos.values() {
            extract_docs(proto, &mut rebuilt.docs);
        }

        *inner = rebuilt;
        Ok(())
    }

    /// Snapshot of all indexed services. Ordering is not guaranteed.
    pub fn list_services(&self) -> Vec<ServiceInfo> {
        let inner = self.inner.read();
        inner
            .services
            .values()
            .map(|svc| service_info(svc, &inner.docs))
            .collect()
    }

    pub fn get_service(&self, name: &str) -> Result<ServiceDescriptor, RegistryError> {
        let inner = self.inner.read();
        inner
            .services
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::ServiceNotFound(name.to_string()))
    }

    /// Two-level lookup distinguishing a missing service from a missing
    /// method.
    pub fn get_method_descriptor(
        &self,
        service_name: &str,
        method_name: &str,
    ) -> Result<MethodDescriptor, RegistryError> {
        let inner = self.inner.read();
        let svc = inner
            .services
            .get(service_name)
            .ok_or_else(|| RegistryError::ServiceNotFound(service_name.to_string()))?;

        svc.methods()
            .find(|m| m.name() == method_name)
            .ok_or_else(|| RegistryError::MethodNotFound {
                service: service_name.to_string(),
                method: method_name.to_string(),
            })
    }

    pub fn get_message_descriptor(&self, name: &str) -> Result<MessageDescriptor, RegistryError> {
        let inner = self.inner.read();
        inner
            .messages
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::MessageNotFound(name.to_string()))
    }

    /// Returns the service's metadata plus a JSON-schema document for every
    /// message reachable from its methods (inputs, outputs, message-typed
    /// fields, and nested types), keyed by message FQN.
    pub fn get_service_schema(
        &self,
        service_name: &str,
    ) -> Result<(ServiceInfo, BTreeMap<String, String>), RegistryError> {
        let inner = self.inner.read();
        let svc = inner
            .services
            .get(service_name)
            .ok_or_else(|| RegistryError::ServiceNotFound(service_name.to_string()))?;

        let info = service_info(svc, &inner.docs);

        let mut schemas = BTreeMap::new();
        let mut seen = HashSet::new();
        for method in svc.methods() {
            schema::collect_message_schemas(&method.input(), &mut schemas, &mut seen);
            schema::collect_message_schemas(&method.output(), &mut schemas, &mut seen);
        }

        Ok((info, schemas))
    }

    pub fn has_service(&self, name: &str) -> bool {
        self.inner.read().services.contains_key(name)
    }

    pub fn get_stats(&self) -> Stats {
        let inner = self.inner.read();
        Stats {
            files: inner.files.len(),
            services: inner.services.len(),
            messages: inner.messages.len(),
        }
    }

    /// Removes all registered descriptors.
    pub fn clear(&self) {
        *self.inner.write() = Inner::default();
    }

    /// Produces a registry with independent containers. Descriptor handles
    /// are shared by reference with this registry.
    pub fn clone_registry(&self) -> Registry {
        Registry {
            inner: RwLock::new(self.inner.read().clone()),
        }
    }

    /// Serializes the registry to a binary `FileDescriptorSet`.
    pub fn marshal_binary(&self) -> Vec<u8> {
        let inner = self.inner.read();
        let fds = FileDescriptorSet {
            file: inner.protos.values().cloned().collect(),
        };
        fds.encode_to_vec()
    }

    /// Registers descriptors from a binary `FileDescriptorSet`.
    pub fn unmarshal_binary(&self, data: &[u8]) -> Result<(), RegistryError> {
        let fds = FileDescriptorSet::decode(data)?;
        self.register(&fds)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

fn index_message(msg: &MessageDescriptor, messages: &mut HashMap<String, MessageDescriptor>) {
    messages.insert(msg.full_name().to_string(), msg.clone());
    for nested in msg.child_messages() {
        index_message(&nested, messages);
    }
}

fn service_info(svc: &ServiceDescriptor, docs: &HashMap<String, String>) -> ServiceInfo {
    let fqn = svc.full_name();
    ServiceInfo {
        name: fqn.to_string(),
        package: svc.parent_file().package_name().to_string(),
        documentation: docs.get(fqn).cloned().unwrap_or_default(),
        methods: svc
            .methods()
            .map(|method| MethodInfo {
                name: method.name().to_string(),
                input_type: method.input().full_name().to_string(),
                output_type: method.output().full_name().to_string(),
                documentation: docs
                    .get(&format!("{fqn}.{}", method.name()))
                    .cloned()
                    .unwrap_or_default(),
                client_streaming: method.is_client_streaming(),
                server_streaming: method.is_server_streaming(),
            })
            .collect(),
    }
}

/// Pulls leading comments for services (path `[6, i]`) and methods
/// (path `[6, i, 2, j]`) out of a file's `SourceCodeInfo`.
fn extract_docs(file: &FileDescriptorProto, docs: &mut HashMap<String, String>) {
    let Some(sci) = &file.source_code_info else {
        return;
    };
    let pkg = file.package();

    for location in &sci.location {
        let Some(comment) = &location.leading_comments else {
            continue;
        };
        match location.path.as_slice() {
            [6, si] => {
                if let Some(svc) = file.service.get(*si as usize) {
                    docs.insert(qualify(pkg, svc.name()), comment.clone());
                }
            }
            [6, si, 2, mi] => {
                if let Some(svc) = file.service.get(*si as usize)
                    && let Some(method) = svc.method.get(*mi as usize)
                {
                    docs.insert(
                        format!("{}.{}", qualify(pkg, svc.name()), method.name()),
                        comment.clone(),
                    );
                }
            }
            _ => {}
        }
    }
}

fn qualify(pkg: &str, name: &str) -> String {
    if pkg.is_empty() {
        name.to_string()
    } else {
        format!("{pkg}.{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost_types::source_code_info::Location;
    use prost_types::{
        DescriptorProto, FieldDescriptorProto, MethodDescriptorProto, ServiceDescriptorProto,
        SourceCodeInfo, field_descriptor_proto,
    };

    fn string_field(name: &str, number: i32) -> FieldDescriptorProto {
        FieldDescriptorProto {
            name: Some(name.to_string()),
            number: Some(number),
            r#type: Some(field_descriptor_proto::Type::String as i32),
            label: Some(field_descriptor_proto::Label::Optional as i32),
            ..Default::default()
        }
    }

    fn message_field(name: &str, number: i32, type_name: &str) -> FieldDescriptorProto {
        FieldDescriptorProto {
            name: Some(name.to_string()),
            number: Some(number),
            r#type: Some(field_descriptor_proto::Type::Message as i32),
            label: Some(field_descriptor_proto::Label::Optional as i32),
            type_name: Some(type_name.to_string()),
            ..Default::default()
        }
    }

    /// A `test.v1` file with one unary and one server-streaming method,
    /// a nested message, and a message-typed field.
    fn test_fds() -> FileDescriptorSet {
        let request = DescriptorProto {
            name: Some("TestRequest".to_string()),
            field: vec![
                string_field("name", 1),
                message_field("details", 2, ".test.v1.Details"),
            ],
            ..Default::default()
        };
        let response = DescriptorProto {
            name: Some("TestResponse".to_string()),
            field: vec![string_field("message", 1)],
            ..Default::default()
        };
        let details = DescriptorProto {
            name: Some("Details".to_string()),
            field: vec![string_field("note", 1)],
            nested_type: vec![DescriptorProto {
                name: Some("Inner".to_string()),
                field: vec![string_field("value", 1)],
                ..Default::default()
            }],
            ..Default::default()
        };

        let service = ServiceDescriptorProto {
            name: Some("TestService".to_string()),
            method: vec![
                MethodDescriptorProto {
                    name: Some("TestMethod".to_string()),
                    input_type: Some(".test.v1.TestRequest".to_string()),
                    output_type: Some(".test.v1.TestResponse".to_string()),
                    ..Default::default()
                },
                MethodDescriptorProto {
                    name: Some("Watch".to_string()),
                    input_type: Some(".test.v1.TestRequest".to_string()),
                    output_type: Some(".test.v1.TestResponse".to_string()),
                    server_streaming: Some(true),
                    ..Default::default()
                },
            ],
            ..Default::default()
        };

        let source_code_info = SourceCodeInfo {
            location: vec![
                Location {
                    path: vec![6, 0],
                    leading_comments: Some(" A service for tests.\n".to_string()),
                    ..Default::default()
                },
                Location {
                    path: vec![6, 0, 2, 0],
                    leading_comments: Some(" Unary test method.\n".to_string()),
                    ..Default::default()
                },
            ],
            ..Default::default()
        };

        FileDescriptorSet {
            file: vec![FileDescriptorProto {
                name: Some("test.proto".to_string()),
                package: Some("test.v1".to_string()),
                syntax: Some("proto3".to_string()),
                message_type: vec![request, response, details],
                service: vec![service],
                source_code_info: Some(source_code_info),
                ..Default::default()
            }],
        }
    }

    #[test]
    fn register_indexes_services_and_messages() {
        let registry = Registry::new();
        registry.register(&test_fds()).unwrap();

        let stats = registry.get_stats();
        assert_eq!(stats.files, 1);
        assert_eq!(stats.services, 1);
        // TestRequest, TestResponse, Details, Details.Inner
        assert_eq!(stats.messages, 4);

        assert!(registry.has_service("test.v1.TestService"));
        assert!(
            registry
                .get_message_descriptor("test.v1.Details.Inner")
                .is_ok()
        );
    }

    #[test]
    fn register_is_idempotent() {
        let registry = Registry::new();
        registry.register(&test_fds()).unwrap();
        let first = registry.get_stats();

        registry.register(&test_fds()).unwrap();
        assert_eq!(registry.get_stats(), first);
    }

    #[test]
    fn register_rejects_dangling_dependency() {
        let fds = FileDescriptorSet {
            file: vec![FileDescriptorProto {
                name: Some("broken.proto".to_string()),
                package: Some("broken.v1".to_string()),
                syntax: Some("proto3".to_string()),
                dependency: vec!["missing.proto".to_string()],
                ..Default::default()
            }],
        };

        let registry = Registry::new();
        assert!(matches!(
            registry.register(&fds),
            Err(RegistryError::Invalid(_))
        ));
    }

    #[test]
    fn list_services_projects_methods_and_docs() {
        let registry = Registry::new();
        registry.register(&test_fds()).unwrap();

        let services = registry.list_services();
        assert_eq!(services.len(), 1);

        let svc = &services[0];
        assert_eq!(svc.name, "test.v1.TestService");
        assert_eq!(svc.package, "test.v1");
        assert!(svc.documentation.contains("A service for tests"));
        assert_eq!(svc.methods.len(), 2);

        let unary = svc.methods.iter().find(|m| m.name == "TestMethod").unwrap();
        assert_eq!(unary.input_type, "test.v1.TestRequest");
        assert_eq!(unary.output_type, "test.v1.TestResponse");
        assert!(unary.documentation.contains("Unary test method"));
        assert!(!unary.client_streaming && !unary.server_streaming);

        let streaming = svc.methods.iter().find(|m| m.name == "Watch").unwrap();
        assert!(streaming.server_streaming);
    }

    #[test]
    fn method_lookup_distinguishes_missing_service_from_missing_method() {
        let registry = Registry::new();
        registry.register(&test_fds()).unwrap();

        assert!(matches!(
            registry.get_method_descriptor("test.v1.Nope", "TestMethod"),
            Err(RegistryError::ServiceNotFound(_))
        ));
        assert!(matches!(
            registry.get_method_descriptor("test.v1.TestService", "Nope"),
            Err(RegistryError::MethodNotFound { .. })
        ));

        let method = registry
            .get_method_descriptor("test.v1.TestService", "TestMethod")
            .unwrap();
        assert_eq!(method.input().full_name(), "test.v1.TestRequest");
    }

    #[test]
    fn service_schema_covers_transitive_messages() {
        let registry = Registry::new();
        registry.register(&test_fds()).unwrap();

        let (info, schemas) = registry.get_service_schema("test.v1.TestService").unwrap();
        assert_eq!(info.name, "test.v1.TestService");

        // Inputs, outputs, the field-referenced Details, and its nested type.
        for key in [
            "test.v1.TestRequest",
            "test.v1.TestResponse",
            "test.v1.Details",
            "test.v1.Details.Inner",
        ] {
            assert!(schemas.contains_key(key), "missing schema for {key}");
        }

        let parsed: serde_json::Value =
            serde_json::from_str(&schemas["test.v1.TestRequest"]).unwrap();
        assert_eq!(parsed["title"], "TestRequest");
        assert_eq!(parsed["type"], "object");
        assert_eq!(parsed["properties"]["name"]["type"], "string");
        assert_eq!(parsed["properties"]["details"]["type"], "object");
        assert_eq!(
            parsed["properties"]["details"]["$ref"],
            "#/definitions/test.v1.Details"
        );
        assert_eq!(parsed["required"], serde_json::json!([]));
    }

    #[test]
    fn clone_has_independent_containers() {
        let registry = Registry::new();
        registry.register(&test_fds()).unwrap();

        let cloned = registry.clone_registry();
        registry.clear();

        assert_eq!(registry.get_stats(), Stats::default());
        assert!(cloned.has_service("test.v1.TestService"));
    }

    #[test]
    fn marshal_unmarshal_round_trip() {
        let registry = Registry::new();
        registry.register(&test_fds()).unwrap();

        let bytes = registry.marshal_binary();
        let restored = Registry::new();
        restored.unmarshal_binary(&bytes).unwrap();

        assert_eq!(restored.get_stats(), registry.get_stats());
    }

    #[test]
    fn unmarshal_rejects_garbage() {
        let registry = Registry::new();
        assert!(matches!(
            registry.unmarshal_binary(&[0xde, 0xad, 0xbe, 0xef]),
            Err(RegistryError::Decode(_))
        ));
    }
}
