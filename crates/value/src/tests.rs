use super::*;

#[test]
fn int_round_trips() {
    let v = Value::Int(42);
    assert_eq!(v.encode(), "i42");
    assert_eq!(Value::decode("i42").unwrap(), v);
}

#[test]
fn negative_int_round_trips() {
    let v = Value::Int(-7);
    assert_eq!(Value::decode(&v.encode()).unwrap(), v);
}

#[test]
fn bool_round_trips() {
    assert_eq!(Value::Bool(true).encode(), "bt");
    assert_eq!(Value::Bool(false).encode(), "bf");
    assert_eq!(Value::decode("bt").unwrap(), Value::Bool(true));
    assert_eq!(Value::decode("bf").unwrap(), Value::Bool(false));
}

#[test]
fn float_round_trips() {
    let v = Value::Float(3.5);
    assert_eq!(Value::decode(&v.encode()).unwrap(), v);
}

#[test]
fn string_round_trips() {
    let v = Value::String("hello world".to_string());
    assert_eq!(v.encode(), "shello world");
    assert_eq!(Value::decode(&v.encode()).unwrap(), v);
}

#[test]
fn empty_string_round_trips() {
    let v = Value::String(String::new());
    assert_eq!(Value::decode(&v.encode()).unwrap(), v);
}

#[test]
fn list_round_trips() {
    let v = Value::List {
        element_type: ValueType::Int,
        items: vec![Value::Int(1), Value::Int(2), Value::Int(3)],
    };
    let encoded = v.encode();
    assert_eq!(encoded, "li,\"i1\",\"i2\",\"i3\"");
    assert_eq!(Value::decode(&encoded).unwrap(), v);
}

#[test]
fn empty_list_round_trips() {
    let v = Value::List {
        element_type: ValueType::String,
        items: vec![],
    };
    assert_eq!(v.encode(), "ls");
    assert_eq!(Value::decode(&v.encode()).unwrap(), v);
}

#[test]
fn pair_round_trips() {
    let v = Value::Pair(Box::new(Value::Int(1)), Box::new(Value::String("a".into())));
    let encoded = v.encode();
    assert_eq!(encoded, "p\"i1\",\"sa\"");
    assert_eq!(Value::decode(&encoded).unwrap(), v);
}

#[test]
fn schema_round_trips() {
    let schema = Schema {
        value_type: ValueType::String,
        list_element_type: None,
        car_type: None,
        cdr_type: None,
        locale: "en".to_string(),
        owner: String::new(),
        short_desc: "short".to_string(),
        long_desc: "long".to_string(),
        default_value: Some(Box::new(Value::String("red".to_string()))),
    };
    let v = Value::Schema(Box::new(schema));
    let encoded = v.encode();
    let decoded = Value::decode(&encoded).unwrap();
    assert_eq!(decoded, v);
}

#[test]
fn schema_without_default_round_trips() {
    let schema = Schema::new(ValueType::Int);
    let v = Value::Schema(Box::new(schema));
    assert_eq!(Value::decode(&v.encode()).unwrap(), v);
}

#[test]
fn quote_unquote_printable_ascii_round_trips() {
    let s = "hello, \"quoted\" and \\backslash\\ world!";
    let quoted = quote(s);
    let (unquoted, _rest) = unquote(&quoted).unwrap();
    assert_eq!(unquoted, s);
}

#[test]
fn numeric_encoding_is_locale_independent() {
    // Rust's f64/i32 Display never consults the process locale, so encoding
    // the same value always yields the same bytes regardless of environment.
    let v = Value::Float(1234.5);
    let a = v.encode();
    let b = v.encode();
    assert_eq!(a, b);
    assert_eq!(a, "f1234.5");
}

#[test]
fn validate_rejects_mismatched_list_element_type() {
    let v = Value::List {
        element_type: ValueType::Int,
        items: vec![Value::Int(1), Value::String("oops".into())],
    };
    assert!(matches!(
        v.validate(),
        Err(ValidationError::ListElementTypeMismatch { index: 1, .. })
    ));
}

#[test]
fn validate_rejects_nested_list_in_list_element_type() {
    let v = Value::List {
        element_type: ValueType::List,
        items: vec![],
    };
    assert!(matches!(v.validate(), Err(ValidationError::NestedComposite(ValueType::List))));
}

#[test]
fn validate_accepts_well_formed_pair() {
    let v = Value::Pair(Box::new(Value::Int(1)), Box::new(Value::Int(2)));
    assert!(v.validate().is_ok());
}

#[test]
fn decoding_malformed_list_element_drops_it_keeps_survivors() {
    // "sX" decodes fine as a String, but it doesn't match the list's
    // declared Int element type, so it is dropped and the survivors form
    // the list (spec.md §8 scenario 3).
    let encoded = "li,\"i1\",\"sX\",\"i2\"";
    let decoded = Value::decode(encoded).unwrap();
    match decoded {
        Value::List { items, .. } => assert_eq!(items, vec![Value::Int(1), Value::Int(2)]),
        _ => panic!("expected list"),
    }
}

#[test]
fn total_order_type_ordinal_first() {
    assert!(Value::Int(1000) < Value::Bool(false));
    assert!(Value::String("a".into()) < Value::Int(0));
}

#[test]
fn decode_empty_is_error() {
    assert_eq!(Value::decode(""), Err(DecodeError::Empty));
}

#[test]
fn decode_unknown_tag_is_error() {
    assert!(matches!(Value::decode("z1"), Err(DecodeError::UnknownTag('z'))));
}

proptest::proptest! {
    #[test]
    fn prop_int_round_trip(i in i32::MIN..=i32::MAX) {
        let v = Value::Int(i);
        proptest::prop_assert_eq!(Value::decode(&v.encode()).unwrap(), v);
    }

    #[test]
    fn prop_string_round_trip_ascii(s in "[ -!#-~]{0,64}") {
        let v = Value::String(s);
        proptest::prop_assert_eq!(Value::decode(&v.encode()).unwrap(), v);
    }
}
