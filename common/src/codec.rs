//! Object graph to records and back.
//!
//! Encoding walks the graph once to assign ids in pre-order, then writes one defining
//! record per object and an empty reference record for every later encounter. Decoding
//! allocates every defined object first and only then fills in payloads, so references
//! (including cyclic ones) always resolve to an existing object.

use std::{collections::HashMap, sync::Arc};

use crate::{
    chunks::BinaryRecord,
    descriptor::TypeId,
    error::SerializationError,
    identity::{ObjectId, ObjectIdentityRegistry},
    payload::{PayloadReader, PayloadWriter},
    type_handler::TypeHandler,
    type_registry::TypeRegistry,
    value::{ObjectRef, Value},
};

enum Event {
    Define {
        object: ObjectRef,
        id: ObjectId,
        handler: Arc<dyn TypeHandler>,
    },
    Reference {
        id: ObjectId,
        type_id: TypeId,
    },
}

/// Encode everything reachable from `root`. Every type in the graph must already have a
/// handler in `types`.
pub fn encode(
    root: &Value,
    ids: &mut ObjectIdentityRegistry,
    types: &TypeRegistry,
) -> Result<Vec<BinaryRecord>, SerializationError> {
    let Some(root) = root.as_object() else {
        let mut writer = PayloadWriter::new(ids);
        writer.write_any(root)?;
        return Ok(vec![BinaryRecord::defining(
            TypeId::ROOT_VALUE,
            ObjectId::NULL,
            writer.into_bytes(),
        )]);
    };

    let events = assign_ids(root, ids, types)?;

    let mut records = Vec::with_capacity(events.len());
    for event in events {
        let record = match event {
            Event::Define {
                object,
                id,
                handler,
            } => {
                let mut writer = PayloadWriter::new(ids);
                handler.encode(&object.lock(), &mut writer)?;
                BinaryRecord::defining(handler.type_id(), id, writer.into_bytes())
            }
            Event::Reference { id, type_id } => BinaryRecord::reference(type_id, id),
        };
        records.push(record);
    }

    Ok(records)
}

/// First phase of encoding: ids in pre-order, and the define or reference event for
/// every encounter of every object.
fn assign_ids(
    root: &ObjectRef,
    ids: &mut ObjectIdentityRegistry,
    types: &TypeRegistry,
) -> Result<Vec<Event>, SerializationError> {
    let mut defined_types = HashMap::new();
    let mut events = Vec::new();
    let mut stack = vec![root.clone()];

    while let Some(object) = stack.pop() {
        let (id, is_new) = ids.id_for(&object);

        if !is_new {
            let type_id = *defined_types
                .get(&id)
                .ok_or(SerializationError::GraphChanged)?;
            events.push(Event::Reference { id, type_id });
            continue;
        }

        let (handler, children) = {
            let guard = object.lock();
            let handler = types.handler_for_object(&guard)?;
            let children = handler.references(&guard);
            (handler, children)
        };

        defined_types.insert(id, handler.type_id());
        stack.extend(children.into_iter().rev());
        events.push(Event::Define {
            object,
            id,
            handler,
        });
    }

    Ok(events)
}

/// Rebuild the graph a record sequence describes. The first record is the root.
pub fn decode(
    records: &[BinaryRecord],
    ids: &mut ObjectIdentityRegistry,
    types: &TypeRegistry,
) -> Result<Value, SerializationError> {
    let Some(first) = records.first() else {
        return Err(SerializationError::malformed("empty record stream"));
    };

    if first.type_id == TypeId::ROOT_VALUE {
        return decode_root_value(records, ids);
    }

    // Pass one: allocate and register a skeleton for every defining record
    let mut defined_types: HashMap<ObjectId, TypeId> = HashMap::new();
    let mut defining = Vec::new();

    for record in records {
        if record.type_id == TypeId::ROOT_VALUE {
            return Err(SerializationError::malformed(
                "root value record inside an object chunk",
            ));
        }

        if let Some(type_id) = defined_types.get(&record.object_id) {
            if *type_id != record.type_id {
                return Err(SerializationError::malformed(format!(
                    "object {} defined as type {} but referenced as {}",
                    record.object_id, type_id, record.type_id
                )));
            }
            if !record.payload.is_empty() {
                return Err(SerializationError::malformed(format!(
                    "object {} is defined twice",
                    record.object_id
                )));
            }
            continue;
        }

        let handler = types.lookup(record.type_id)?;
        ids.register(record.object_id, ObjectRef::new(handler.allocate()))?;
        defined_types.insert(record.object_id, record.type_id);
        defining.push((record, handler));
    }

    // Pass two: fill in payloads now that every reference target exists
    for (record, handler) in defining {
        let object = ids
            .object_for(record.object_id)
            .cloned()
            .ok_or_else(|| SerializationError::malformed("allocated object disappeared"))?;

        let mut reader = PayloadReader::new(&record.payload, ids);
        handler.populate(&mut object.lock(), &mut reader)?;
        reader.finish()?;
    }

    ids.object_for(first.object_id)
        .cloned()
        .map(Value::Ref)
        .ok_or_else(|| SerializationError::malformed("root object was not defined"))
}

fn decode_root_value(
    records: &[BinaryRecord],
    ids: &ObjectIdentityRegistry,
) -> Result<Value, SerializationError> {
    let [record] = records else {
        return Err(SerializationError::malformed(
            "root value record must be the only record",
        ));
    };

    if !record.object_id.is_null() {
        return Err(SerializationError::malformed(
            "root value record carries an object id",
        ));
    }

    let mut reader = PayloadReader::new(&record.payload, ids);
    let value = reader.read_any()?;
    reader.finish()?;

    Ok(value)
}
