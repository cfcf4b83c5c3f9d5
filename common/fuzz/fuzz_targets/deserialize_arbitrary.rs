#![no_main]

use common::{
    descriptor::{FieldKind, TypeDescriptor},
    Serializer, SerializerConfig, TypeRegistry,
};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let types = TypeRegistry::with_types([
        TypeDescriptor::builder("Node")
            .field("label", FieldKind::Text)
            .field("next", FieldKind::Reference)
            .field("extra", FieldKind::Any)
            .build(),
    ])
    .unwrap();
    let serializer = Serializer::with_registry(SerializerConfig::default(), std::sync::Arc::new(types));

    // Must fail cleanly, never panic or hang
    let _ = serializer.deserialize(data);
});
