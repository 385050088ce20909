use crate::pal::CpuidRegisters;

#[cfg(target_arch = "x86_64")]
pub(crate) fn execute(leaf: u32, subleaf: u32) -> CpuidRegisters {
    // SAFETY: CPUID is available on every x86_64 processor.
    let result = unsafe { core::arch::x86_64::__cpuid_count(leaf, subleaf) };

    CpuidRegisters {
        eax: result.eax,
        ebx: result.ebx,
        ecx: result.ecx,
        edx: result.edx,
    }
}

#[cfg(target_arch = "x86")]
pub(crate) fn execute(leaf: u32, subleaf: u32) -> CpuidRegisters {
    // SAFETY: We do not support the pre-Pentium processors that lack CPUID.
    let result = unsafe { core::arch::x86::__cpuid_count(leaf, subleaf) };

    CpuidRegisters {
        eax: result.eax,
        ebx: result.ebx,
        ecx: result.ecx,
        edx: result.edx,
    }
}

// No such instruction. All zeroes reads as "no leaves supported" to the classifier.
#[cfg(not(any(target_arch = "x86", target_arch = "x86_64")))]
pub(crate) fn execute(_leaf: u32, _subleaf: u32) -> CpuidRegisters {
    CpuidRegisters::default()
}
