use crate::classfile::patch::{ClassEditor, MemberKind};
use crate::classfile::{AccessFlags, REF_INVOKE_SPECIAL};
use crate::error::Result;
use crate::widener::tree::{AccessWidenerTree, MemberIdentifier};
use crate::widener::AccessMask;

/// Apply a widener tree to raw class bytes.
pub fn apply_widener(data: &[u8], tree: &AccessWidenerTree) -> Result<Vec<u8>> {
    let mut editor = ClassEditor::parse(data)?;
    apply_to_class(&mut editor, tree)?;
    Ok(editor.finish())
}

/// Apply a widener tree to an already-parsed class. The byte-level and
/// node-level paths share this implementation and produce identical output.
pub fn apply_to_class(editor: &mut ClassEditor, tree: &AccessWidenerTree) -> Result<()> {
    let class_name = editor.class_name()?;
    let class_access = AccessFlags::from_bits_retain(editor.class_access());
    let is_interface = class_access.contains(AccessFlags::INTERFACE);

    // Inner-class table entries are widened for any class in the tree, not
    // just the one being processed.
    for (entry, inner_name, _simple, access) in editor.inner_classes()? {
        if let Some(inner) = tree.classes.get(&inner_name) {
            let old = AccessFlags::from_bits_retain(access);
            let new = widen_class_access(old, inner.total());
            if new != old {
                editor.set_inner_access(entry, new.bits());
            }
        }
    }

    let Some(accessed) = tree.classes.get(&class_name) else {
        return Ok(());
    };

    let widened_class = widen_class_access(class_access, accessed.total());
    if widened_class != class_access {
        editor.set_class_access(widened_class.bits());
    }
    if accessed.mask.contains(AccessMask::EXTENDABLE) {
        editor.remove_class_attributes("PermittedSubclasses");
    }

    for member in editor.members() {
        let key = MemberIdentifier {
            name: member.name.clone(),
            desc: member.desc.clone(),
        };
        let old = AccessFlags::from_bits_retain(member.access);
        let new = match member.kind {
            MemberKind::Field => match accessed.fields.get(&key) {
                Some(&mask) => widen_field_access(old, mask, is_interface),
                None => continue,
            },
            MemberKind::Method => match accessed.methods.get(&key) {
                Some(&mask) => widen_method_access(old, mask, is_interface, &member.name),
                None => continue,
            },
            MemberKind::RecordComponent => continue,
        };
        if new != old {
            editor.set_member_access(&member, new.bits())?;
        }
    }

    // Widening can turn a compiler-chosen invokespecial into a call to a
    // now-virtual method; promote those sites to preserve dispatch.
    let widened_virtual = |name: &str, desc: &str| -> bool {
        if name == "<init>" {
            return false;
        }
        accessed
            .methods
            .get(&MemberIdentifier {
                name: name.to_string(),
                desc: desc.to_string(),
            })
            .is_some_and(|mask| mask.contains(AccessMask::ACCESSIBLE))
    };
    for site in editor.invokespecial_sites()? {
        if site.owner == class_name && widened_virtual(&site.name, &site.desc) {
            editor.promote_invokespecial(&site);
        }
    }
    for handle in editor.bootstrap_arg_handles()? {
        if handle.kind == REF_INVOKE_SPECIAL
            && handle.owner == class_name
            && widened_virtual(&handle.name, &handle.desc)
        {
            editor.promote_handle(handle.index)?;
        }
    }
    Ok(())
}

fn make_public(mut access: AccessFlags) -> AccessFlags {
    access.remove(AccessFlags::PRIVATE | AccessFlags::PROTECTED);
    access.insert(AccessFlags::PUBLIC);
    access
}

fn widen_class_access(mut access: AccessFlags, mask: AccessMask) -> AccessFlags {
    if mask.contains(AccessMask::ACCESSIBLE) {
        access = make_public(access);
    }
    if mask.contains(AccessMask::EXTENDABLE) {
        access = make_public(access);
        access.remove(AccessFlags::FINAL);
    }
    access
}

fn widen_field_access(mut access: AccessFlags, mask: AccessMask, is_interface: bool) -> AccessFlags {
    if mask.contains(AccessMask::ACCESSIBLE) {
        access = make_public(access);
    }
    if mask.contains(AccessMask::MUTABLE) {
        // A static final interface field is a constant and stays one.
        if !(is_interface && access.contains(AccessFlags::STATIC)) {
            access.remove(AccessFlags::FINAL);
        }
    }
    access
}

fn widen_method_access(
    mut access: AccessFlags,
    mask: AccessMask,
    is_interface: bool,
    name: &str,
) -> AccessFlags {
    if mask.contains(AccessMask::ACCESSIBLE) {
        let was_private = access.contains(AccessFlags::PRIVATE);
        let stays_non_virtual =
            name == "<init>" || is_interface || access.contains(AccessFlags::STATIC);
        access = make_public(access);
        if was_private && !stays_non_virtual {
            // A private method was never overridable; keep it that way.
            access.insert(AccessFlags::FINAL);
        }
    }
    if mask.contains(AccessMask::EXTENDABLE) {
        if !access.contains(AccessFlags::PUBLIC) {
            access.remove(AccessFlags::PRIVATE);
            access.insert(AccessFlags::PROTECTED);
        }
        access.remove(AccessFlags::FINAL);
    }
    access
}
