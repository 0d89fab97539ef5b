use std::sync::Arc;

use lowsig::Description;
use lowsig::ScalarType;

use crate::abi::FunctionAbiResolver;
use crate::abi::Reflection;
use crate::abi::ReflectionAttrs;
use crate::buffer::Buffer;
use crate::buffer::BufferUsage;
use crate::buffer::HeapAllocator;
use crate::buffer::HeapBuffer;
use crate::buffer::MemoryAccess;
use crate::buffer::MemoryType;
use crate::context::Imports;
use crate::engine::Linkage;
use crate::engine::ModuleImpl;
use crate::error::Error;
use crate::host;
use crate::host::HostArray;
use crate::module::ExecutableModule;
use crate::native::NativeModule;
use crate::status::Status;
use crate::status::StatusCode;
use crate::text;
use crate::variant::RefObject;
use crate::variant::Value;
use crate::variant::Variant;
use crate::variant::VariantList;
use crate::variant::VmRef;

const CANONICAL: &str = "I15!B11!d10d128d64R15!B11!t6d32d8d64";

fn resolver() -> FunctionAbiResolver {
    FunctionAbiResolver::new(Arc::new(HeapAllocator))
}

fn heap(size: usize) -> Arc<HeapBuffer> {
    Arc::new(HeapBuffer::allocate(MemoryType::HOST_LOCAL, BufferUsage::ALL, size).unwrap())
}

// --- Host layouts ---

#[test]
fn test_describe_row_major() {
    let layout = host::describe(ScalarType::Sint32, &[2, 3]).unwrap();
    assert_eq!(layout.element_size, 4);
    assert_eq!(layout.format, "i");
    assert_eq!(layout.dims, vec![2, 3]);
    assert_eq!(layout.strides, vec![12, 4]);
    assert_eq!(layout.byte_extent(), 24);
}

#[test]
fn test_describe_rank_zero_and_three() {
    let scalar = host::describe(ScalarType::Float64, &[]).unwrap();
    assert!(scalar.strides.is_empty());
    assert_eq!(scalar.byte_extent(), 8);

    let cube = host::describe(ScalarType::Uint8, &[2, 3, 4]).unwrap();
    assert_eq!(cube.format, "B");
    assert_eq!(cube.strides, vec![12, 4, 1]);
}

#[test]
fn test_describe_rejects_half_and_dynamic() {
    assert_eq!(
        host::describe(ScalarType::Float16, &[2]),
        Err(Error::Unimplemented("Unimplemented ScalarType".to_string()))
    );
    assert!(matches!(host::describe(ScalarType::Bfloat16, &[]), Err(Error::Unimplemented(_))));
    assert!(matches!(
        host::describe(ScalarType::Float32, &[4, -1]),
        Err(Error::InvalidArgument(_))
    ));
}

#[test]
fn test_describe_rejects_oversized_shapes() {
    let err = host::describe(ScalarType::Sint32, &[i32::MAX; 4]).unwrap_err();
    assert_eq!(
        err,
        Error::InvalidArgument(format!(
            "Host array shape {:?} overflows its byte extent",
            [i32::MAX; 4]
        ))
    );

    let empty = host::describe(ScalarType::Uint8, &[0, 3]).unwrap();
    assert_eq!(empty.byte_extent(), 0);
    assert_eq!(empty.strides, vec![3, 1]);
}

// --- Heap buffers ---

#[test]
fn test_heap_buffer_roundtrip() {
    let buffer = heap(8);
    assert_eq!(buffer.byte_length(), 8);
    buffer.write_data(2, &[1, 2, 3]).unwrap();
    let mut out = [0u8; 8];
    buffer.read_data(0, &mut out).unwrap();
    assert_eq!(out, [0, 0, 1, 2, 3, 0, 0, 0]);

    buffer.fill_zero(0, 8).unwrap();
    buffer.read_data(0, &mut out).unwrap();
    assert_eq!(out, [0; 8]);
}

#[test]
fn test_heap_buffer_refuses_write_while_read_mapped() {
    let buffer = heap(4);
    let mapping = buffer.map(MemoryAccess::Read, 0, 4).unwrap();
    let err = buffer.write_data(0, &[1]).unwrap_err();
    assert_eq!(err.code, StatusCode::FailedPrecondition);

    buffer.unmap(&mapping).unwrap();
    assert_eq!(buffer.unmap(&mapping).unwrap_err().code, StatusCode::InvalidArgument);
    buffer.write_data(0, &[1]).unwrap();
    assert_eq!(buffer.live_mappings(), 0);
}

#[test]
fn test_heap_buffer_bounds() {
    let buffer = heap(4);
    assert_eq!(buffer.map(MemoryAccess::Read, 2, 3).unwrap_err().code, StatusCode::OutOfRange);
    let wrapped = buffer.map(MemoryAccess::Read, usize::MAX, 2).unwrap_err();
    assert_eq!(wrapped.code, StatusCode::OutOfRange);
}

// --- Host arrays ---

#[test]
fn test_mapped_buffer_unmaps_once() {
    let buffer = heap(24);
    buffer.write_data(0, &7i32.to_ne_bytes()).unwrap();
    let layout = host::describe(ScalarType::Sint32, &[2, 3]).unwrap();
    let mapped = host::map_for_read(layout, buffer.clone()).unwrap();
    assert_eq!(buffer.live_mappings(), 1);

    let array = host::expose_as_host_array(mapped);
    let alias = array.clone();
    drop(array);
    assert_eq!(buffer.live_mappings(), 1);
    assert_eq!(alias.as_slice::<i32>().unwrap()[0], 7);
    assert_eq!(alias.strides(), &[12, 4]);
    drop(alias);
    assert_eq!(buffer.live_mappings(), 0);
}

#[test]
fn test_map_for_read_rejects_small_buffer() {
    let layout = host::describe(ScalarType::Float32, &[4]).unwrap();
    let err = host::map_for_read(layout, heap(8)).err().unwrap();
    assert!(matches!(err, Error::InvalidArgument(_)));
}

#[test]
fn test_host_array_typed_view() {
    let array = HostArray::from_slice(&[1.5f32, 2.5, 3.5, 4.5], &[2, 2]).unwrap();
    assert_eq!(array.shape(), &[2, 2]);
    assert_eq!(array.format(), "f");
    assert_eq!(array.as_slice::<f32>().unwrap(), &[1.5, 2.5, 3.5, 4.5]);
    assert!(matches!(array.as_slice::<i32>(), Err(Error::InvalidArgument(_))));
    assert_eq!(array.base().buffer().byte_length(), 16);

    assert!(HostArray::from_slice(&[1i32, 2, 3], &[2, 2]).is_err());
}

// --- Variant lists ---

struct Fence;

impl RefObject for Fence {
    fn type_name(&self) -> &str {
        "hal.fence"
    }
}

#[test]
fn test_variant_list_display() {
    let mut list = VariantList::new(3);
    assert_eq!(list.len(), 3);
    assert_eq!(list.to_string(), "<VariantList(3): [None, None, None]>");

    list.set(0, Value::I32(7)).unwrap();
    list.set(1, Variant::buffer(heap(16))).unwrap();
    assert_eq!(list.to_string(), "<VariantList(3): [7, Buffer(16), None]>");
    assert_eq!(list.to_string(), "<VariantList(3): [7, Buffer(16), None]>");

    list.set(2, Variant::Ref(VmRef::Object(Arc::new(Fence)))).unwrap();
    assert_eq!(list.to_string(), "<VariantList(3): [7, Buffer(16), Unknown(hal.fence)]>");

    assert_eq!(list.set(3, Value::I32(1)).unwrap_err().code, StatusCode::OutOfRange);
    assert_eq!(VariantList::new(0).to_string(), "<VariantList(0): []>");
}

// --- Reflection ---

/// Yields two attributes, then fails with a non-NotFound status.
struct BrokenReflection;

impl ModuleImpl for BrokenReflection {
    fn name(&self) -> &str {
        "broken"
    }

    fn imports(&self) -> &[String] {
        &[]
    }

    fn lookup_function(&self, _linkage: Linkage, _name: &str) -> Result<u32, Status> {
        Ok(0)
    }

    fn reflection_attr(
        &self,
        _linkage: Linkage,
        _ordinal: u32,
        index: usize,
    ) -> Result<(String, String), Status> {
        match index {
            0 => Ok(("fv".to_string(), "1".to_string())),
            1 => Ok(("f".to_string(), "I1!R1!".to_string())),
            _ => Err(Status::internal("reflection table corrupt")),
        }
    }

    fn call(
        &self,
        _linkage: Linkage,
        _ordinal: u32,
        _imports: &Imports<'_>,
        _inputs: &VariantList,
        _outputs: &mut VariantList,
    ) -> Result<(), Status> {
        Ok(())
    }
}

fn noop(_: &Imports<'_>, _: &VariantList, _: &mut VariantList) -> Result<(), Status> {
    Ok(())
}

#[test]
fn test_reflection_attrs_stop_at_not_found() {
    let module = NativeModule::builder("m")
        .export("f", &[("fv", "1"), ("f", CANONICAL), ("fv", "2")], noop)
        .build();
    let function = module.lookup_export("f").unwrap().unwrap();

    let attrs: Vec<_> = ReflectionAttrs::new(&function).collect();
    assert_eq!(attrs.len(), 3);

    let reflection = Reflection::from_function(&function).unwrap();
    assert_eq!(reflection.get("fv"), Some("1"));
    assert_eq!(reflection.get("missing"), None);
}

#[test]
fn test_reflection_attrs_surface_errors_once() {
    let module = ExecutableModule::synthesized(Arc::new(BrokenReflection));
    let function = module.lookup_export("anything").unwrap().unwrap();

    let mut attrs = ReflectionAttrs::new(&function);
    assert!(attrs.next().unwrap().is_ok());
    assert!(attrs.next().unwrap().is_ok());
    assert_eq!(attrs.next().unwrap().unwrap_err().code, StatusCode::Internal);
    assert!(attrs.next().is_none());

    let err = Reflection::from_function(&function).unwrap_err();
    assert_eq!(err.status_code(), Some(StatusCode::Internal));
}

// --- Function ABI ---

#[test]
fn test_abi_display() {
    let abi = resolver()
        .resolve_reflection(&Reflection::from_pairs([("fv", "1"), ("f", CANONICAL)]))
        .unwrap();
    assert_eq!(
        abi.to_string(),
        "<FunctionAbi (Buffer<float32[10x128x64]>) -> (Buffer<sint32[32x8x64]>)>"
    );
    assert_eq!(abi.raw_signature(), CANONICAL);
    assert_eq!(abi.inputs().len(), 1);
}

#[test]
fn test_abi_metadata_errors() {
    let r = resolver();
    let missing = r.resolve_reflection(&Reflection::from_pairs([("fv", "1")])).unwrap_err();
    assert_eq!(invalid(missing), "No raw abi reflection metadata for function");

    let version = r
        .resolve_reflection(&Reflection::from_pairs([("fv", "2"), ("f", CANONICAL)]))
        .unwrap_err();
    assert_eq!(version, Error::InvalidArgument("Unsupported raw function ABI version".to_string()));

    let no_version = r.resolve_reflection(&Reflection::from_pairs([("f", CANONICAL)])).unwrap_err();
    assert_eq!(invalid(no_version), "Unsupported raw function ABI version");

    let bad = r
        .resolve_reflection(&Reflection::from_pairs([("fv", "1"), ("f", "I3!Z")]))
        .unwrap_err();
    let Error::InvalidArgument(msg) = bad else {
        panic!("expected invalid argument");
    };
    assert!(msg.starts_with("Error parsing raw ABI signature: "));
    assert!(msg.ends_with(" ('I3!Z')"));
}

fn abi_for(sig: &str) -> crate::abi::FunctionAbi {
    resolver()
        .resolve_reflection(&Reflection::from_pairs([("fv", "1"), ("f", sig)]))
        .unwrap()
}

fn invalid(err: Error) -> String {
    match err {
        Error::InvalidArgument(msg) => msg,
        other => panic!("expected invalid argument, got {:?}", other),
    }
}

#[test]
fn test_raw_pack_checks() {
    let sig = lowsig::SignatureBuilder::new()
        .input(&Description::buffer(ScalarType::Float32, &[2, 3]))
        .build();
    let abi = abi_for(&sig);

    let rank = HostArray::from_slice(&[0f32; 6], &[6]).unwrap();
    assert_eq!(
        invalid(abi.raw_pack(&[rank.into()]).unwrap_err()),
        "Mismatched buffer rank (received: 1, expected: 2)"
    );

    let size = HostArray::from_slice(&[0f64; 6], &[2, 3]).unwrap();
    assert_eq!(
        invalid(abi.raw_pack(&[size.into()]).unwrap_err()),
        "Mismatched buffer item size (received: 8, expected: 4)"
    );

    let format = HostArray::from_slice(&[0i32; 6], &[2, 3]).unwrap();
    assert_eq!(
        invalid(abi.raw_pack(&[format.into()]).unwrap_err()),
        "Mismatched buffer format (received: i, expected: f)"
    );

    let dim = HostArray::from_slice(&[0f32; 6], &[3, 2]).unwrap();
    assert_eq!(
        invalid(abi.raw_pack(&[dim.into()]).unwrap_err()),
        "Mismatched buffer dim (received: 3, expected: 2)"
    );

    assert_eq!(invalid(abi.raw_pack(&[]).unwrap_err()), "Mismatched RawPack() input arity");
}

#[test]
fn test_raw_pack_copies() {
    let sig = lowsig::SignatureBuilder::new()
        .input(&Description::buffer(ScalarType::Sint32, &[2]))
        .input(&Description::scalar(ScalarType::Sint32))
        .build();
    let abi = abi_for(&sig);
    let array = HostArray::from_slice(&[5i32, 6], &[2]).unwrap();
    let list = abi.raw_pack(&[array.clone().into(), Value::I32(3).into()]).unwrap();

    assert_eq!(list.to_string(), "<VariantList(2): [Buffer(8), 3]>");
    let packed = list.get(0).and_then(Variant::as_buffer).unwrap();
    assert!(!Arc::ptr_eq(packed, array.base().buffer()));

    let wrong = abi.raw_pack(&[array.into(), Value::I64(3).into()]).unwrap_err();
    assert_eq!(invalid(wrong), "Mismatched scalar type (received: sint64, expected: sint32)");
}

#[test]
fn test_raw_pack_dynamic_and_refs() {
    let dynamic = abi_for(
        &lowsig::SignatureBuilder::new()
            .input(&Description::buffer(ScalarType::Float32, &[-1]))
            .build(),
    );
    let array = HostArray::from_slice(&[0f32; 3], &[3]).unwrap();
    assert_eq!(
        dynamic.raw_pack(&[array.clone().into()]).unwrap_err(),
        Error::Unimplemented("Dynamic argument dimensions not implemented".to_string())
    );

    let refs = abi_for(&lowsig::SignatureBuilder::new().input(&Description::ref_object()).build());
    assert_eq!(
        refs.raw_pack(&[array.into()]).unwrap_err(),
        Error::Unimplemented("Ref objects not yet supported".to_string())
    );
}

#[test]
fn test_allocate_results() {
    let sig = lowsig::SignatureBuilder::new()
        .input(&Description::scalar(ScalarType::Sint32))
        .result(&Description::buffer(ScalarType::Sint32, &[32, 8, 64]))
        .result(&Description::buffer(ScalarType::Float32, &[-1, 4]))
        .result(&Description::scalar(ScalarType::Float32))
        .build();
    let abi = abi_for(&sig);
    let args = abi.raw_pack(&[Value::I32(1).into()]).unwrap();

    let statics = abi.allocate_results(&args, true).unwrap();
    assert_eq!(statics.to_string(), "<VariantList(3): [Buffer(65536), None, None]>");

    let lazy = abi.allocate_results(&args, false).unwrap();
    assert_eq!(lazy.to_string(), "<VariantList(3): [None, None, None]>");

    assert_eq!(
        invalid(abi.allocate_results(&VariantList::new(2), true).unwrap_err()),
        "Mismatched AllocateResults() input arity"
    );
}

#[test]
fn test_allocate_results_rejects_oversized_buffers() {
    let huge = Description::buffer(ScalarType::Float64, &[i32::MAX, i32::MAX]);
    let abi = abi_for(&lowsig::SignatureBuilder::new().result(&huge).build());

    assert_eq!(
        invalid(abi.allocate_results(&VariantList::new(0), true).unwrap_err()),
        "Result Buffer<float64[2147483647x2147483647]> overflows its byte size"
    );

    let lazy = abi.allocate_results(&VariantList::new(0), false).unwrap();
    assert_eq!(lazy.to_string(), "<VariantList(1): [None]>");

    let mut results = VariantList::new(1);
    results.set(0, Variant::buffer(heap(8))).unwrap();
    assert!(matches!(abi.raw_unpack(&results), Err(Error::InvalidArgument(_))));
}

#[test]
fn test_raw_unpack() {
    let sig = lowsig::SignatureBuilder::new()
        .result(&Description::buffer(ScalarType::Sint32, &[2, 2]))
        .result(&Description::scalar(ScalarType::Float64))
        .build();
    let abi = abi_for(&sig);
    let mut results = abi.allocate_results(&VariantList::new(0), true).unwrap();
    let buffer = results.get(0).and_then(Variant::as_buffer).unwrap().clone();
    let bytes: Vec<u8> = [1i32, 2, 3, 4].iter().flat_map(|v| v.to_ne_bytes()).collect();
    buffer.write_data(0, &bytes).unwrap();
    results.set(1, Value::F64(0.5)).unwrap();

    let values = abi.raw_unpack(&results).unwrap();
    let array = values[0].as_array().unwrap();
    assert_eq!(array.shape(), &[2, 2]);
    assert_eq!(array.as_slice::<i32>().unwrap(), &[1, 2, 3, 4]);
    assert_eq!(values[1].as_scalar(), Some(Value::F64(0.5)));

    let empty = abi.allocate_results(&VariantList::new(0), false).unwrap();
    assert_eq!(
        invalid(abi.raw_unpack(&empty).unwrap_err()),
        "Could not deref result buffer (wrong type?)"
    );
    assert_eq!(
        invalid(abi.raw_unpack(&VariantList::new(1)).unwrap_err()),
        "Mismatched RawUnpack() result arity"
    );
}

// --- Text values ---

#[test]
fn test_text_roundtrip() {
    let descs = vec![
        Description::scalar(ScalarType::Sint32),
        Description::buffer(ScalarType::Sint32, &[2, 2]),
    ];
    let inputs = ["\"i32=42\"", " 2x2xi32=[42 43][44 45] "];
    let list = text::parse_to_variant_list(&HeapAllocator, &descs, &inputs).unwrap();
    assert_eq!(list.to_string(), "<VariantList(2): [42, Buffer(16)]>");
    assert_eq!(text::print_variant_list(&descs, &list).unwrap(), "i32=42\n2x2xi32=[42 43][44 45]");
}

#[test]
fn test_text_prints_nested_and_floats() {
    let descs = vec![Description::buffer(ScalarType::Float32, &[2, 1, 2])];
    let inputs = ["2x1x2xf32=1.5 2 3 4.25"];
    let list = text::parse_to_variant_list(&HeapAllocator, &descs, &inputs).unwrap();
    assert_eq!(text::print_variant_list(&descs, &list).unwrap(), "2x1x2xf32=[[1.5 2]][[3 4.25]]");
}

#[test]
fn test_text_errors() {
    let descs = vec![Description::scalar(ScalarType::Sint32)];
    let err = text::parse_to_variant_list::<&str>(&HeapAllocator, &descs, &[]).unwrap_err();
    assert_eq!(invalid(err), "Signature mismatch; expected 1 buffer strings but received 0");

    let buf = vec![Description::buffer(ScalarType::Sint32, &[2])];
    assert!(text::parse_to_variant_list(&HeapAllocator, &buf, &["3xi32=1 2 3"]).is_err());
    assert!(text::parse_to_variant_list(&HeapAllocator, &buf, &["2xf32=1 2"]).is_err());
    assert!(text::parse_to_variant_list(&HeapAllocator, &buf, &["2xi32=1"]).is_err());

    let float = vec![Description::scalar(ScalarType::Float32)];
    assert!(matches!(
        text::parse_to_variant_list(&HeapAllocator, &float, &["f32=1.0"]),
        Err(Error::Unimplemented(_))
    ));
}
