//! Substitution table.
//!
//! Long names are matched as literal prefixes in table order, so `sysfs`
//! must precede `sys`. Short codes are single characters.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubstKind {
    Devnode,
    Attr,
    Env,
    Kernel,
    KernelNumber,
    Driver,
    Devpath,
    Id,
    Major,
    Minor,
    Result,
    Parent,
    Name,
    Links,
    Root,
    Sys,
}

#[derive(Debug, Clone, Copy)]
pub struct Substitution {
    pub name: &'static str,
    pub code: char,
    pub kind: SubstKind,
}

const fn subst(name: &'static str, code: char, kind: SubstKind) -> Substitution {
    Substitution { name, code, kind }
}

pub static SUBSTITUTIONS: [Substitution; 18] = [
    subst("devnode", 'N', SubstKind::Devnode),
    subst("tempnode", 'N', SubstKind::Devnode),
    subst("attr", 's', SubstKind::Attr),
    subst("sysfs", 's', SubstKind::Attr),
    subst("env", 'E', SubstKind::Env),
    subst("kernel", 'k', SubstKind::Kernel),
    subst("number", 'n', SubstKind::KernelNumber),
    subst("driver", 'd', SubstKind::Driver),
    subst("devpath", 'p', SubstKind::Devpath),
    subst("id", 'b', SubstKind::Id),
    subst("major", 'M', SubstKind::Major),
    subst("minor", 'm', SubstKind::Minor),
    subst("result", 'c', SubstKind::Result),
    subst("parent", 'P', SubstKind::Parent),
    subst("name", 'D', SubstKind::Name),
    subst("links", 'L', SubstKind::Links),
    subst("root", 'r', SubstKind::Root),
    subst("sys", 'S', SubstKind::Sys),
];

/// Entry whose long name prefixes `input`.
pub fn by_name(input: &str) -> Option<&'static Substitution> {
    SUBSTITUTIONS.iter().find(|s| input.starts_with(s.name))
}

pub fn by_code(code: char) -> Option<&'static Substitution> {
    SUBSTITUTIONS.iter().find(|s| s.code == code)
}
