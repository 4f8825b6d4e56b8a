//! Declaration model: managed classes, their native methods and the
//! annotations that steer code generation

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Primitive {
    Byte,
    Short,
    Int,
    Long,
    Float,
    Double,
    Char,
    Boolean,
}

impl Primitive {
    pub const ALL: [Primitive; 8] = [
        Self::Byte,
        Self::Short,
        Self::Int,
        Self::Long,
        Self::Float,
        Self::Double,
        Self::Char,
        Self::Boolean,
    ];

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.name() == name)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Byte => "byte",
            Self::Short => "short",
            Self::Int => "int",
            Self::Long => "long",
            Self::Float => "float",
            Self::Double => "double",
            Self::Char => "char",
            Self::Boolean => "boolean",
        }
    }

    /// Signature letter, also the `np_value` union field in lower case
    pub fn signature(self) -> char {
        match self {
            Self::Byte => 'B',
            Self::Short => 'S',
            Self::Int => 'I',
            Self::Long => 'J',
            Self::Float => 'F',
            Self::Double => 'D',
            Self::Char => 'C',
            Self::Boolean => 'Z',
        }
    }

    pub fn value_field(self) -> char {
        self.signature().to_ascii_lowercase()
    }

    /// C spelling used for element access and casts
    pub fn cpp_name(self) -> &'static str {
        match self {
            Self::Byte => "signed char",
            Self::Short => "short",
            Self::Int => "int",
            Self::Long => "long long",
            Self::Float => "float",
            Self::Double => "double",
            Self::Char => "unsigned short",
            Self::Boolean => "unsigned char",
        }
    }

    /// Typedef used on the generated entry-point signatures
    pub fn abi_name(self) -> &'static str {
        match self {
            Self::Byte => "np_byte",
            Self::Short => "np_short",
            Self::Int => "np_int",
            Self::Long => "np_long",
            Self::Float => "np_float",
            Self::Double => "np_double",
            Self::Char => "np_char",
            Self::Boolean => "np_boolean",
        }
    }

    /// Runtime handle class addressing elements of this type
    pub fn handle_class(self) -> &'static str {
        match self {
            Self::Byte => "BytePointer",
            Self::Short => "ShortPointer",
            Self::Int => "IntPointer",
            Self::Long => "LongPointer",
            Self::Float => "FloatPointer",
            Self::Double => "DoublePointer",
            Self::Char => "CharPointer",
            Self::Boolean => "BoolPointer",
        }
    }

    #[inline]
    pub fn is_index(self) -> bool {
        matches!(self, Self::Int | Self::Long)
    }
}

/// Type of a parameter or return value as seen from Rust
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ManagedType {
    #[default]
    Void,
    Primitive(Primitive),
    /// Primitive array passed as `np_array`
    Array(Primitive),
    /// Direct buffer passed as `np_array`
    Buffer(Primitive),
    String,
    Class,
    /// An `AddressHandle` of the named handle class
    Handle(String),
}

impl ManagedType {
    pub fn handle(name: impl Into<String>) -> Self {
        Self::Handle(name.into())
    }

    #[inline]
    pub fn is_void(&self) -> bool {
        matches!(self, Self::Void)
    }

    pub fn primitive(&self) -> Option<Primitive> {
        match self {
            Self::Primitive(p) => Some(*p),
            _ => None,
        }
    }

    #[inline]
    pub fn is_primitive_array(&self) -> bool {
        matches!(self, Self::Array(_))
    }

    pub fn is_index(&self) -> bool {
        self.primitive().map_or(false, Primitive::is_index)
    }

    pub fn handle_name(&self) -> Option<&str> {
        match self {
            Self::Handle(name) => Some(name),
            _ => None,
        }
    }

    /// Signature fragment used to disambiguate overloaded entry points
    pub fn signature(&self) -> String {
        match self {
            Self::Void => "V".to_string(),
            Self::Primitive(p) => p.signature().to_string(),
            Self::Array(p) => format!("[{}", p.signature()),
            Self::Buffer(p) => format!("L{}buffer;", p.name()),
            Self::String => "Lstring;".to_string(),
            Self::Class => "Lclass;".to_string(),
            Self::Handle(name) => format!("L{};", name.replace('.', "/")),
        }
    }
}

impl fmt::Display for ManagedType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Void => write!(f, "void"),
            Self::Primitive(p) => write!(f, "{}", p.name()),
            Self::Array(p) => write!(f, "{}[]", p.name()),
            Self::Buffer(p) => write!(f, "buffer<{}>", p.name()),
            Self::String => write!(f, "String"),
            Self::Class => write!(f, "Class"),
            Self::Handle(name) => write!(f, "{}", name),
        }
    }
}

fn is_class_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '$'))
}

impl FromStr for ManagedType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s {
            "void" => return Ok(Self::Void),
            "String" => return Ok(Self::String),
            "Class" => return Ok(Self::Class),
            _ => {}
        }
        if let Some(element) = s.strip_suffix("[]") {
            return Primitive::parse(element.trim())
                .map(Self::Array)
                .ok_or_else(|| format!("arrays must hold a primitive type: {}", s));
        }
        if let Some(element) = s.strip_prefix("buffer<").and_then(|rest| rest.strip_suffix('>')) {
            return match Primitive::parse(element.trim()) {
                Some(Primitive::Boolean) | None => {
                    Err(format!("buffers must hold a numeric type: {}", s))
                }
                Some(p) => Ok(Self::Buffer(p)),
            };
        }
        if let Some(p) = Primitive::parse(s) {
            return Ok(Self::Primitive(p));
        }
        if is_class_name(s) {
            return Ok(Self::Handle(s.to_string()));
        }
        Err(format!("not a type: {:?}", s))
    }
}

impl TryFrom<String> for ManagedType {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ManagedType> for String {
    fn from(ty: ManagedType) -> Self {
        ty.to_string()
    }
}

/// How a native value is passed or returned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PassBy {
    Val,
    Ref,
    Ptr,
    PtrPtr,
    PtrRef,
}

impl fmt::Display for PassBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Val => "ByVal",
            Self::Ref => "ByRef",
            Self::Ptr => "ByPtr",
            Self::PtrPtr => "ByPtrPtr",
            Self::PtrRef => "ByPtrRef",
        };
        f.write_str(name)
    }
}

/// Conversion object wrapped around an argument or return value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterDecl {
    /// Adapter template, e.g. `NP_VectorAdapter`
    pub name: String,
    /// Template argument, appended as `name< value_type >`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_type: Option<String>,
    #[serde(default = "default_argc")]
    pub argc: usize,
    /// Cast applied to the adapter when passing it to the callee
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cast: Option<String>,
    #[serde(default, rename = "const")]
    pub constant: bool,
}

fn default_argc() -> usize {
    1
}

impl AdapterDecl {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value_type: None,
            argc: 1,
            cast: None,
            constant: false,
        }
    }

    pub fn with_value_type(mut self, value_type: impl Into<String>) -> Self {
        self.value_type = Some(value_type.into());
        self
    }

    /// Full C++ type of the adapter object
    pub fn type_name(&self) -> String {
        match &self.value_type {
            Some(value) if !value.is_empty() => format!("{}< {} >", self.name, value),
            _ => self.name.clone(),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

fn one_or_many<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(value) => vec![value],
        OneOrMany::Many(values) => values,
    })
}

/// Annotations attached to a parameter, or to a method for its return value
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Annotations {
    #[serde(deserialize_with = "one_or_many", skip_serializing_if = "Vec::is_empty")]
    pub by: Vec<PassBy>,
    /// Explicit C++ type, e.g. `size_t` or `char**`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cast: Option<String>,
    #[serde(rename = "const")]
    pub constant: bool,
    pub const_pointer: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adapter: Option<AdapterDecl>,
    /// Pass the ABI value through untouched
    pub raw: bool,
}

impl Annotations {
    /// Effective passing mode; the first one wins
    pub fn by(&self) -> Option<PassBy> {
        self.by.first().copied()
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn is_casted(&self) -> bool {
        self.cast.as_deref().map_or(false, |c| !c.is_empty()) || self.is_const()
    }

    pub fn is_const(&self) -> bool {
        self.constant || self.const_pointer
    }

    /// First pair of annotations that cannot be combined, as (kept, ignored)
    pub fn conflict(&self) -> Option<(String, String)> {
        if self.by.len() > 1 {
            return Some((self.by[0].to_string(), self.by[1].to_string()));
        }
        if self.cast.is_some() && self.is_const() && self.adapter.is_none() {
            return Some(("Cast".to_string(), "Const".to_string()));
        }
        None
    }
}

/// Explicitly requested code shape for a method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Behavior {
    Allocator,
    ArrayAllocator,
    Deallocator,
    ValueGetter,
    ValueSetter,
    MemberGetter,
    MemberSetter,
    BufferGetter,
    Function,
    Callback,
}

impl fmt::Display for Behavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Allocator => "Allocator",
            Self::ArrayAllocator => "ArrayAllocator",
            Self::Deallocator => "Deallocator",
            Self::ValueGetter => "ValueGetter",
            Self::ValueSetter => "ValueSetter",
            Self::MemberGetter => "MemberGetter",
            Self::MemberSetter => "MemberSetter",
            Self::BufferGetter => "BufferGetter",
            Self::Function => "Function",
            Self::Callback => "Callback",
        };
        f.write_str(name)
    }
}

/// Platform filter: `value` prefixes must match (if any), `not` prefixes must not
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Platform {
    #[serde(deserialize_with = "one_or_many")]
    pub value: Vec<String>,
    #[serde(deserialize_with = "one_or_many")]
    pub not: Vec<String>,
}

impl Platform {
    pub fn matches(&self, platform: &str) -> bool {
        let hit = |names: &[String]| names.iter().any(|name| platform.starts_with(name.as_str()));
        (self.value.is_empty() || hit(&self.value)) && (self.not.is_empty() || !hit(&self.not))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParamDecl {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub ty: ManagedType,
    /// Native spelling resolved through the type map when loading
    #[serde(skip_serializing_if = "Option::is_none")]
    pub native: Option<String>,
    #[serde(flatten)]
    pub annotations: Annotations,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MethodDecl {
    pub name: String,
    #[serde(rename = "static")]
    pub is_static: bool,
    /// Implemented in native code; non-native methods only describe callbacks
    pub native: bool,
    pub params: Vec<ParamDecl>,
    pub returns: ManagedType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub returns_native: Option<String>,
    /// Return-side annotations
    pub annotations: Annotations,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub behavior: Option<Behavior>,
    /// Native member name, optionally followed by a prefix and suffix
    #[serde(deserialize_with = "one_or_many", skip_serializing_if = "Vec::is_empty")]
    pub cpp_name: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub no_exception: bool,
    pub no_offset: bool,
    #[serde(rename = "virtual")]
    pub is_virtual: bool,
    /// Prepend `env` and the receiver to the native call
    pub with_env: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub throws: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
}

impl Default for MethodDecl {
    fn default() -> Self {
        Self {
            name: String::new(),
            is_static: false,
            native: true,
            params: Vec::new(),
            returns: ManagedType::Void,
            returns_native: None,
            annotations: Annotations::default(),
            behavior: None,
            cpp_name: Vec::new(),
            index: None,
            namespace: None,
            no_exception: false,
            no_offset: false,
            is_virtual: false,
            with_env: false,
            throws: None,
            platform: None,
        }
    }
}

impl MethodDecl {
    pub fn param_types(&self) -> impl Iterator<Item = &ManagedType> + '_ {
        self.params.iter().map(|p| &p.ty)
    }

    /// Mangled signature of the parameter list
    pub fn signature(&self) -> String {
        let params: String = self.param_types().map(ManagedType::signature).collect();
        format!("({}){}", params, self.returns.signature())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassKind {
    /// Native struct or class, addressable by value
    #[default]
    Struct,
    /// Incomplete native type, only ever handled through pointers
    Opaque,
    /// Native function pointer with a managed `call` target
    Function,
    /// Holder of free functions; contributes only its namespace
    Namespace,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassDecl {
    /// Managed name, e.g. `demo.Vector`
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpp_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Managed name of the declaring class
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enclosing: Option<String>,
    pub kind: ClassKind,
    pub no_exception: bool,
    pub no_offset: bool,
    pub no_deallocator: bool,
    /// Calling convention of a function pointer class
    #[serde(skip_serializing_if = "Option::is_none")]
    pub convention: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
    pub methods: Vec<MethodDecl>,
}

impl ClassDecl {
    /// Last segment of the managed name
    pub fn simple_name(&self) -> &str {
        let cut = self.name.rfind(['$', '.']).map_or(0, |i| i + 1);
        &self.name[cut..]
    }

    pub fn method(&self, name: &str) -> Option<&MethodDecl> {
        self.methods.iter().find(|m| m.name == name)
    }

    pub fn has_virtual_methods(&self) -> bool {
        self.methods.iter().any(|m| m.is_virtual)
    }

    pub fn is_addressable(&self) -> bool {
        self.kind == ClassKind::Struct
    }
}

/// A native spelling registered with the type map
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TypeRule {
    pub native: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<ManagedType>,
    pub pointers: Vec<ManagedType>,
    pub cast: bool,
    pub array_element: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adapter: Option<String>,
}

/// On-disk form of a declaration set
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeclarationFile {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    pub types: Vec<TypeRule>,
    pub classes: Vec<ClassDecl>,
}
