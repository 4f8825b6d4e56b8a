//! Optional header declaring the exported entry points and trampolines

use super::ir::Fragment;
use super::prelude::{abi, include, MACROS};
use super::{mangle, Context, Tables};

fn guard(module: &str) -> String {
    format!("NP_{}_H", mangle::mangle(module).to_ascii_uppercase())
}

pub(super) fn render(ctx: &Context<'_>, tables: &Tables) -> Fragment {
    let guard = guard(ctx.decls.module());
    let mut out = vec![
        Fragment::line(format!(
            "// Generated by nativeport for module {}. Do not edit.",
            ctx.decls.module()
        )),
        Fragment::directive(format!("#ifndef {}", guard)),
        Fragment::directive(format!("#define {}", guard)),
        Fragment::Blank,
        Fragment::text(MACROS),
        Fragment::Blank,
        include("<stddef.h>"),
        include("<stdint.h>"),
    ];
    let includes = ctx.properties.get("platform.include");
    if !includes.is_empty() && !tables.callbacks.is_empty() {
        out.push(Fragment::directive("#ifdef __cplusplus"));
        out.extend(includes.iter().map(|name| include(name)));
        out.push(Fragment::directive("#endif"));
    }
    out.push(Fragment::Blank);
    out.push(abi());
    out.push(Fragment::Blank);

    out.push(Fragment::directive("#ifdef __cplusplus"));
    out.push(Fragment::line("extern \"C\" {"));
    out.push(Fragment::directive("#endif"));
    out.push(Fragment::line("NP_IMPORT int np_module_load(np_env* env);"));
    out.push(Fragment::line("NP_IMPORT void np_module_unload(np_env* env);"));
    for prototype in &tables.exports {
        out.push(Fragment::line(format!("NP_IMPORT {};", prototype)));
    }
    out.push(Fragment::directive("#ifdef __cplusplus"));
    out.push(Fragment::line("}"));
    out.push(Fragment::directive("#endif"));
    out.push(Fragment::Blank);
    out.push(Fragment::directive(format!("#endif // {}", guard)));
    Fragment::Seq(out)
}
