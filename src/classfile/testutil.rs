//! Minimal class-file writer for tests.

/// Constant pool entries needed by synthesized class files.
enum CpEntry {
    Utf8(String),
    Class(u16),
    NameAndType(u16, u16),
    FieldRef(u16, u16),
    MethodRef(u16, u16),
    MethodHandle(u8, u16),
    MethodType(u16),
    InvokeDynamic(u16, u16),
}

struct FieldSpec {
    access: u16,
    name_index: u16,
    descriptor_index: u16,
}

struct MethodSpec {
    access: u16,
    name_index: u16,
    descriptor_index: u16,
    code: Vec<u8>,
}

/// Builder assembling a small, valid class file byte for byte.
pub(crate) struct ClassFileBuilder {
    cp: Vec<CpEntry>,
    access: u16,
    this_class: u16,
    super_class: u16,
    interfaces: Vec<u16>,
    fields: Vec<FieldSpec>,
    methods: Vec<MethodSpec>,
    bootstrap_methods: Vec<(u16, Vec<u16>)>,
    permitted_subclasses: Vec<u16>,
    code_index: u16,
}

impl ClassFileBuilder {
    pub(crate) fn new(class_name: &str, super_name: &str) -> Self {
        let mut builder = Self {
            cp: Vec::new(),
            access: 0x0021,
            this_class: 0,
            super_class: 0,
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            bootstrap_methods: Vec::new(),
            permitted_subclasses: Vec::new(),
            code_index: 0,
        };
        builder.code_index = builder.add_utf8("Code");
        builder.this_class = builder.add_class(class_name);
        builder.super_class = builder.add_class(super_name);
        builder
    }

    pub(crate) fn set_access(&mut self, access: u16) {
        self.access = access;
    }

    pub(crate) fn add_utf8(&mut self, value: &str) -> u16 {
        self.cp.push(CpEntry::Utf8(value.to_string()));
        self.cp.len() as u16
    }

    pub(crate) fn add_class(&mut self, name: &str) -> u16 {
        let name_index = self.add_utf8(name);
        self.cp.push(CpEntry::Class(name_index));
        self.cp.len() as u16
    }

    pub(crate) fn add_interface(&mut self, name: &str) {
        let index = self.add_class(name);
        self.interfaces.push(index);
    }

    pub(crate) fn add_name_and_type(&mut self, name: &str, descriptor: &str) -> u16 {
        let name_index = self.add_utf8(name);
        let descriptor_index = self.add_utf8(descriptor);
        self.cp
            .push(CpEntry::NameAndType(name_index, descriptor_index));
        self.cp.len() as u16
    }

    pub(crate) fn add_field_ref(&mut self, class: &str, name: &str, descriptor: &str) -> u16 {
        let class_index = self.add_class(class);
        let name_and_type = self.add_name_and_type(name, descriptor);
        self.cp.push(CpEntry::FieldRef(class_index, name_and_type));
        self.cp.len() as u16
    }

    pub(crate) fn add_method_ref(&mut self, class: &str, name: &str, descriptor: &str) -> u16 {
        let class_index = self.add_class(class);
        let name_and_type = self.add_name_and_type(name, descriptor);
        self.cp.push(CpEntry::MethodRef(class_index, name_and_type));
        self.cp.len() as u16
    }

    pub(crate) fn add_method_handle(&mut self, kind: u8, reference: u16) -> u16 {
        self.cp.push(CpEntry::MethodHandle(kind, reference));
        self.cp.len() as u16
    }

    pub(crate) fn add_method_type(&mut self, descriptor: &str) -> u16 {
        let index = self.add_utf8(descriptor);
        self.cp.push(CpEntry::MethodType(index));
        self.cp.len() as u16
    }

    /// Register a bootstrap method and return an InvokeDynamic pool index
    /// naming it with `name` and `descriptor`.
    pub(crate) fn add_invoke_dynamic(
        &mut self,
        handle: u16,
        args: Vec<u16>,
        name: &str,
        descriptor: &str,
    ) -> u16 {
        let bootstrap_index = self.bootstrap_methods.len() as u16;
        self.bootstrap_methods.push((handle, args));
        let name_and_type = self.add_name_and_type(name, descriptor);
        self.cp
            .push(CpEntry::InvokeDynamic(bootstrap_index, name_and_type));
        self.cp.len() as u16
    }

    pub(crate) fn add_permitted_subclass(&mut self, name: &str) {
        let index = self.add_class(name);
        self.permitted_subclasses.push(index);
    }

    pub(crate) fn add_field(&mut self, access: u16, name: &str, descriptor: &str) {
        let name_index = self.add_utf8(name);
        let descriptor_index = self.add_utf8(descriptor);
        self.fields.push(FieldSpec {
            access,
            name_index,
            descriptor_index,
        });
    }

    pub(crate) fn add_method(&mut self, access: u16, name: &str, descriptor: &str, code: Vec<u8>) {
        let name_index = self.add_utf8(name);
        let descriptor_index = self.add_utf8(descriptor);
        self.methods.push(MethodSpec {
            access,
            name_index,
            descriptor_index,
            code,
        });
    }

    pub(crate) fn finish(mut self) -> Vec<u8> {
        let mut class_attrs: Vec<(u16, Vec<u8>)> = Vec::new();
        if !self.permitted_subclasses.is_empty() {
            let name_index = self.add_utf8("PermittedSubclasses");
            let mut body = Vec::new();
            write_u16(&mut body, self.permitted_subclasses.len() as u16);
            for index in &self.permitted_subclasses {
                write_u16(&mut body, *index);
            }
            class_attrs.push((name_index, body));
        }
        if !self.bootstrap_methods.is_empty() {
            let name_index = self.add_utf8("BootstrapMethods");
            let mut body = Vec::new();
            write_u16(&mut body, self.bootstrap_methods.len() as u16);
            for (handle, args) in &self.bootstrap_methods {
                write_u16(&mut body, *handle);
                write_u16(&mut body, args.len() as u16);
                for arg in args {
                    write_u16(&mut body, *arg);
                }
            }
            class_attrs.push((name_index, body));
        }

        let mut bytes = Vec::new();
        write_u32(&mut bytes, 0xCAFEBABE);
        write_u16(&mut bytes, 0);
        write_u16(&mut bytes, 52);
        write_u16(&mut bytes, (self.cp.len() + 1) as u16);
        for entry in &self.cp {
            entry.write(&mut bytes);
        }
        write_u16(&mut bytes, self.access);
        write_u16(&mut bytes, self.this_class);
        write_u16(&mut bytes, self.super_class);
        write_u16(&mut bytes, self.interfaces.len() as u16);
        for interface in &self.interfaces {
            write_u16(&mut bytes, *interface);
        }
        write_u16(&mut bytes, self.fields.len() as u16);
        for field in &self.fields {
            write_u16(&mut bytes, field.access);
            write_u16(&mut bytes, field.name_index);
            write_u16(&mut bytes, field.descriptor_index);
            write_u16(&mut bytes, 0);
        }
        write_u16(&mut bytes, self.methods.len() as u16);
        for method in &self.methods {
            write_u16(&mut bytes, method.access);
            write_u16(&mut bytes, method.name_index);
            write_u16(&mut bytes, method.descriptor_index);
            if method.code.is_empty() {
                write_u16(&mut bytes, 0);
                continue;
            }
            write_u16(&mut bytes, 1);
            write_u16(&mut bytes, self.code_index);
            let attr_len = 12 + method.code.len() as u32;
            write_u32(&mut bytes, attr_len);
            write_u16(&mut bytes, 8);
            write_u16(&mut bytes, 8);
            write_u32(&mut bytes, method.code.len() as u32);
            bytes.extend_from_slice(&method.code);
            write_u16(&mut bytes, 0);
            write_u16(&mut bytes, 0);
        }
        write_u16(&mut bytes, class_attrs.len() as u16);
        for (name_index, body) in &class_attrs {
            write_u16(&mut bytes, *name_index);
            write_u32(&mut bytes, body.len() as u32);
            bytes.extend_from_slice(body);
        }
        bytes
    }
}

impl CpEntry {
    fn write(&self, bytes: &mut Vec<u8>) {
        match self {
            CpEntry::Utf8(value) => {
                bytes.push(1);
                write_u16(bytes, value.len() as u16);
                bytes.extend_from_slice(value.as_bytes());
            }
            CpEntry::Class(name_index) => {
                bytes.push(7);
                write_u16(bytes, *name_index);
            }
            CpEntry::NameAndType(name_index, descriptor_index) => {
                bytes.push(12);
                write_u16(bytes, *name_index);
                write_u16(bytes, *descriptor_index);
            }
            CpEntry::FieldRef(class_index, name_and_type) => {
                bytes.push(9);
                write_u16(bytes, *class_index);
                write_u16(bytes, *name_and_type);
            }
            CpEntry::MethodRef(class_index, name_and_type) => {
                bytes.push(10);
                write_u16(bytes, *class_index);
                write_u16(bytes, *name_and_type);
            }
            CpEntry::MethodHandle(kind, reference) => {
                bytes.push(15);
                bytes.push(*kind);
                write_u16(bytes, *reference);
            }
            CpEntry::MethodType(descriptor_index) => {
                bytes.push(16);
                write_u16(bytes, *descriptor_index);
            }
            CpEntry::InvokeDynamic(bootstrap_index, name_and_type) => {
                bytes.push(18);
                write_u16(bytes, *bootstrap_index);
                write_u16(bytes, *name_and_type);
            }
        }
    }
}

pub(crate) fn write_u16(bytes: &mut Vec<u8>, value: u16) {
    bytes.extend_from_slice(&value.to_be_bytes());
}

pub(crate) fn write_u32(bytes: &mut Vec<u8>, value: u32) {
    bytes.extend_from_slice(&value.to_be_bytes());
}

pub(crate) fn high(value: u16) -> u8 {
    (value >> 8) as u8
}

pub(crate) fn low(value: u16) -> u8 {
    (value & 0xff) as u8
}
