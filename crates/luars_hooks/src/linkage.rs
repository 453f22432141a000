// Linkage with a C Lua build
// Describes how a stock Lua source tree is pointed at host hook symbols: a user
// header (passed through LUA_USER_H) redefines the lock and user-state macros
// to call exported host functions.

use std::fmt::Write;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LuaVersion {
    Lua51,
    Lua52,
    Lua53,
    Lua54,
}

impl LuaVersion {
    pub const ALL: [LuaVersion; 4] = [
        LuaVersion::Lua51,
        LuaVersion::Lua52,
        LuaVersion::Lua53,
        LuaVersion::Lua54,
    ];

    /// Static library name of the runtime build
    pub fn lib_name(self) -> &'static str {
        match self {
            LuaVersion::Lua51 => "lua5.1",
            LuaVersion::Lua52 => "lua5.2",
            LuaVersion::Lua53 => "lua5.3",
            LuaVersion::Lua54 => "lua5.4",
        }
    }

    /// Directory of the bundled source release
    pub fn source_dir(self) -> &'static str {
        match self {
            LuaVersion::Lua51 => "lua-5.1.5",
            LuaVersion::Lua52 => "lua-5.2.4",
            LuaVersion::Lua53 => "lua-5.3.6",
            LuaVersion::Lua54 => "lua-5.4.7",
        }
    }

    /// Extra compatibility define the build needs, if any
    pub fn compat_define(self) -> Option<&'static str> {
        match self {
            LuaVersion::Lua54 => Some("LUA_COMPAT_5_3"),
            _ => None,
        }
    }
}

/// The four interpreter macros routed to host hooks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookKind {
    Lock,
    Unlock,
    UserStateOpen,
    UserStateClose,
}

impl HookKind {
    pub const ALL: [HookKind; 4] = [
        HookKind::Lock,
        HookKind::Unlock,
        HookKind::UserStateOpen,
        HookKind::UserStateClose,
    ];

    /// Macro the interpreter invokes (same name in 5.1 through 5.4)
    pub fn macro_name(self) -> &'static str {
        match self {
            HookKind::Lock => "lua_lock",
            HookKind::Unlock => "lua_unlock",
            HookKind::UserStateOpen => "luai_userstateopen",
            HookKind::UserStateClose => "luai_userstateclose",
        }
    }

    fn suffix(self) -> &'static str {
        match self {
            HookKind::Lock => "lock",
            HookKind::Unlock => "unlock",
            HookKind::UserStateOpen => "userstateopen",
            HookKind::UserStateClose => "userstateclose",
        }
    }
}

/// User header mapping each `HookKind` macro to `<prefix>_<hook>(L)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserHeader {
    prefix: String,
}

impl UserHeader {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Exported symbol the host must provide for `kind`
    pub fn symbol(&self, kind: HookKind) -> String {
        format!("{}_{}", self.prefix, kind.suffix())
    }

    pub fn include_guard(&self) -> String {
        format!("__{}_H__", self.prefix.to_ascii_uppercase())
    }

    pub fn render(&self) -> String {
        let guard = self.include_guard();
        let mut out = String::new();
        let _ = writeln!(out, "#ifndef {guard}");
        let _ = writeln!(out, "#define {guard}");
        out.push('\n');
        for kind in HookKind::ALL {
            let _ = writeln!(out, "#define {}(L) {}(L)", kind.macro_name(), self.symbol(kind));
        }
        out.push('\n');
        for kind in HookKind::ALL {
            let _ = writeln!(out, "extern void {}(lua_State*);", self.symbol(kind));
        }
        out.push('\n');
        let _ = writeln!(out, "#endif /* {guard} */");
        out
    }

    /// `LUA_USER_H` define pointing the build at a header written to `path`
    pub fn define(&self, path: &str) -> (&'static str, String) {
        ("LUA_USER_H", format!("\"{path}\""))
    }
}
